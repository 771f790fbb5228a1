use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use bookstore_api::{
    config::AppConfig,
    db::{create_pool, orm_from_pool, run_migrations},
    models::Role,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config).await?;
    run_migrations(&orm_from_pool(pool.clone())).await?;

    let admin_id = ensure_user(&pool, "Admin", "admin@example.com", "admin123", Role::Admin).await?;
    let customer_id =
        ensure_user(&pool, "Customer", "customer@example.com", "customer123", Role::Customer)
            .await?;
    seed_catalog(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, Customer ID: {customer_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(id)
}

async fn ensure_category(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let fiction = ensure_category(pool, "Fiction").await?;
    let programming = ensure_category(pool, "Programming").await?;
    let history = ensure_category(pool, "History").await?;

    // Prices in paisa.
    let books = vec![
        ("Muna Madan", "Laxmi Prasad Devkota", 45000_i64, 40_i32, fiction),
        ("Palpasa Cafe", "Narayan Wagle", 60000, 25, fiction),
        ("The Rust Programming Language", "Steve Klabnik", 350000, 15, programming),
        ("Zero to Production in Rust", "Luca Palmieri", 420000, 10, programming),
        ("A History of Nepal", "John Whelpton", 280000, 12, history),
    ];

    for (title, author, price, stock, category_id) in books {
        sqlx::query(
            r#"
            INSERT INTO books (id, title, author, price, stock, category_id)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (SELECT 1 FROM books WHERE title = $2)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(author)
        .bind(price)
        .bind(stock)
        .bind(category_id)
        .execute(pool)
        .await?;
    }

    println!("Seeded categories and books");
    Ok(())
}
