//! eSewa redirect-payment plumbing: the signed redirect URL sent out at initiation and
//! the callback payload that comes back.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use url::Url;
use uuid::Uuid;

use crate::{config::EsewaConfig, error::AppError, models::TransactionStatus, money};

type HmacSha256 = Hmac<Sha256>;

pub const INITIATE_SIGNED_FIELDS: &str = "total_amount,transaction_uuid,product_code";

/// base64(HMAC-SHA256(secret, message)).
pub fn sign(secret: &str, message: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid eSewa secret key")))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct PaymentRedirect<'a> {
    pub transaction_id: Uuid,
    pub amount: i64,
    pub product_code: &'a str,
    pub success_url: &'a str,
    pub failure_url: &'a str,
}

/// Build the gateway URL the customer is redirected to.
pub fn build_payment_url(config: &EsewaConfig, redirect: &PaymentRedirect<'_>) -> Result<String, AppError> {
    let amount = money::format_amount(redirect.amount);
    let transaction_uuid = redirect.transaction_id.to_string();
    let message = format!(
        "total_amount={amount},transaction_uuid={transaction_uuid},product_code={}",
        redirect.product_code
    );
    let signature = sign(&config.secret_key, &message)?;

    let url = Url::parse_with_params(
        &config.gateway_url,
        &[
            ("transaction_uuid", transaction_uuid.as_str()),
            ("amount", amount.as_str()),
            ("tax_amount", "0"),
            ("total_amount", amount.as_str()),
            ("product_code", redirect.product_code),
            ("product_service_charge", "0"),
            ("product_delivery_charge", "0"),
            ("success_url", redirect.success_url),
            ("failure_url", redirect.failure_url),
            ("signed_field_names", INITIATE_SIGNED_FIELDS),
            ("signature", signature.as_str()),
        ],
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid eSewa gateway url: {e}")))?;

    Ok(url.into())
}

/// Fields this service reads from an otherwise opaque gateway callback.
#[derive(Debug, Clone, Default)]
pub struct GatewayCallback {
    pub transaction_uuid: Option<String>,
    pub transaction_code: Option<String>,
    pub status: Option<String>,
    pub total_amount: Option<String>,
    pub ref_id: Option<String>,
    pub message: Option<String>,
    pub signed_field_names: Option<String>,
    pub signature: Option<String>,
}

impl GatewayCallback {
    pub fn from_value(payload: &Value) -> Self {
        Self {
            transaction_uuid: field_str(payload, "transaction_uuid"),
            transaction_code: field_str(payload, "transaction_code"),
            status: field_str(payload, "status"),
            total_amount: field_str(payload, "total_amount"),
            ref_id: field_str(payload, "ref_id"),
            message: field_str(payload, "message"),
            signed_field_names: field_str(payload, "signed_field_names"),
            signature: field_str(payload, "signature"),
        }
    }

    /// Our transaction id and the field it was read from. `transaction_uuid` is what we
    /// sent at initiation; older callbacks only echo it back as `transaction_code`. The
    /// first field holding a valid UUID wins.
    pub fn transaction_id_field(&self) -> Result<(&'static str, Uuid), AppError> {
        [
            ("transaction_uuid", self.transaction_uuid.as_deref()),
            ("transaction_code", self.transaction_code.as_deref()),
        ]
        .into_iter()
        .find_map(|(field, raw)| {
            raw.and_then(|raw| Uuid::parse_str(raw.trim()).ok())
                .map(|id| (field, id))
        })
        .ok_or_else(|| AppError::bad_request("invalid transaction code"))
    }

    pub fn transaction_id(&self) -> Result<Uuid, AppError> {
        self.transaction_id_field().map(|(_, id)| id)
    }

    /// The gateway's own reference for the payment, if it sent one.
    pub fn external_reference(&self) -> Option<String> {
        let gateway_code = if self.transaction_uuid.is_some() {
            self.transaction_code.clone()
        } else {
            None
        };
        self.ref_id.clone().or(gateway_code)
    }

    pub fn outcome(&self) -> TransactionStatus {
        map_gateway_status(self.status.as_deref().unwrap_or_default())
    }

    pub fn is_signed(&self) -> bool {
        self.signed_field_names.as_deref().is_some_and(|s| !s.is_empty())
            && self.signature.as_deref().is_some_and(|s| !s.is_empty())
    }
}

pub fn map_gateway_status(status: &str) -> TransactionStatus {
    match status.trim().to_ascii_uppercase().as_str() {
        "COMPLETE" | "SUCCESS" => TransactionStatus::Success,
        "FAILED" | "ERROR" => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    }
}

/// Fields a callback signature must cover besides the transaction id. The initiation
/// signature handed to the customer covers neither `status` nor anything the gateway
/// decides, so it can never authenticate a callback.
pub const CALLBACK_REQUIRED_FIELDS: [&str; 2] = ["status", "total_amount"];

/// Check the callback signature over the fields it claims to sign. The signed set must
/// include the outcome, the amount and the id field used to find the transaction.
pub fn verify_signature(payload: &Value, secret: &str) -> Result<(), AppError> {
    let callback = GatewayCallback::from_value(payload);
    let (id_field, _) = callback.transaction_id_field()?;
    let (Some(fields), Some(signature)) = (callback.signed_field_names, callback.signature) else {
        return Err(AppError::bad_request("gateway callback is not signed"));
    };

    let names: Vec<&str> = fields
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if let Some(missing) = CALLBACK_REQUIRED_FIELDS
        .iter()
        .chain(std::iter::once(&id_field))
        .find(|required| !names.contains(*required))
    {
        return Err(AppError::bad_request(format!(
            "gateway signature does not cover {missing}"
        )));
    }

    let message = names
        .iter()
        .map(|name| format!("{name}={}", field_str(payload, name).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join(",");

    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| AppError::bad_request("invalid gateway signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid eSewa secret key")))?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| AppError::bad_request("gateway signature mismatch"))
}

/// Decode the `data` query parameter of the gateway's success redirect.
pub fn decode_redirect_payload(data: &str) -> Result<Value, AppError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|_| AppError::bad_request("invalid gateway payload encoding"))?;
    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::bad_request("invalid gateway payload"))?;
    if !payload.is_object() {
        return Err(AppError::bad_request("invalid gateway payload"));
    }
    Ok(payload)
}

fn field_str(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "8gBm/:&EnhH.1/q";

    #[test]
    fn signature_is_base64_hmac_sha256() {
        let sig = sign(
            SECRET,
            "total_amount=100,transaction_uuid=11-201-13,product_code=EPAYTEST",
        )
        .unwrap();
        assert_eq!(sig, "5DZywcrTKD0gia/rsSMcrRHmJl+4Tbol6S+lWgdJ94E=");
    }

    #[test]
    fn payment_url_carries_id_amount_and_signature() {
        let config = EsewaConfig::default();
        let id = Uuid::new_v4();
        let url = build_payment_url(
            &config,
            &PaymentRedirect {
                transaction_id: id,
                amount: 2500,
                product_code: "EPAYTEST",
                success_url: "http://localhost/ok",
                failure_url: "http://localhost/fail",
            },
        )
        .unwrap();

        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert!(url.starts_with(&config.gateway_url));
        assert_eq!(params["transaction_uuid"], id.to_string());
        assert_eq!(params["total_amount"], "25.00");
        assert_eq!(params["success_url"], "http://localhost/ok");

        let expected = sign(
            &config.secret_key,
            &format!("total_amount=25.00,transaction_uuid={id},product_code=EPAYTEST"),
        )
        .unwrap();
        assert_eq!(params["signature"], expected);
    }

    #[test]
    fn gateway_vocabulary_maps_to_internal_status() {
        assert_eq!(map_gateway_status("COMPLETE"), TransactionStatus::Success);
        assert_eq!(map_gateway_status("SUCCESS"), TransactionStatus::Success);
        assert_eq!(map_gateway_status("FAILED"), TransactionStatus::Failed);
        assert_eq!(map_gateway_status("ERROR"), TransactionStatus::Failed);
        assert_eq!(map_gateway_status("AMBIGUOUS"), TransactionStatus::Pending);
        assert_eq!(map_gateway_status(""), TransactionStatus::Pending);
    }

    #[test]
    fn transaction_id_prefers_the_uuid_we_sent() {
        let ours = Uuid::new_v4();
        let cb = GatewayCallback::from_value(&json!({
            "transaction_uuid": ours.to_string(),
            "transaction_code": "000AWEO",
            "status": "COMPLETE"
        }));
        assert_eq!(cb.transaction_id().unwrap(), ours);
        assert_eq!(cb.external_reference().as_deref(), Some("000AWEO"));

        let legacy = GatewayCallback::from_value(&json!({
            "transaction_code": ours.to_string(),
            "ref_id": "REF-1"
        }));
        assert_eq!(legacy.transaction_id().unwrap(), ours);
        assert_eq!(legacy.external_reference().as_deref(), Some("REF-1"));

        let bad = GatewayCallback::from_value(&json!({ "transaction_code": "nope" }));
        assert!(matches!(bad.transaction_id(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn malformed_uuid_falls_back_to_transaction_code() {
        let ours = Uuid::new_v4();
        let cb = GatewayCallback::from_value(&json!({
            "transaction_uuid": "garbled",
            "transaction_code": ours.to_string(),
        }));
        assert_eq!(cb.transaction_id_field().unwrap(), ("transaction_code", ours));
    }

    #[test]
    fn initiation_signature_cannot_authenticate_a_callback() {
        let config = EsewaConfig::default();
        let id = Uuid::new_v4();
        let url = build_payment_url(
            &config,
            &PaymentRedirect {
                transaction_id: id,
                amount: 2500,
                product_code: "EPAYTEST",
                success_url: "http://localhost/ok",
                failure_url: "http://localhost/fail",
            },
        )
        .unwrap();
        let params: std::collections::HashMap<_, _> =
            Url::parse(&url).unwrap().query_pairs().into_owned().collect();

        let replayed = json!({
            "transaction_uuid": params["transaction_uuid"],
            "total_amount": params["total_amount"],
            "product_code": params["product_code"],
            "status": "COMPLETE",
            "signed_field_names": params["signed_field_names"],
            "signature": params["signature"],
        });
        let callback = GatewayCallback::from_value(&replayed);
        assert!(callback.is_signed());
        assert!(matches!(
            verify_signature(&replayed, &config.secret_key),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn signature_must_cover_the_lookup_id() {
        let ours = Uuid::new_v4();
        let fields = "transaction_code,status,total_amount";
        let signature = sign(
            SECRET,
            "transaction_code=000AWEO,status=COMPLETE,total_amount=25.00",
        )
        .unwrap();
        let payload = json!({
            "transaction_code": "000AWEO",
            "transaction_uuid": ours.to_string(),
            "status": "COMPLETE",
            "total_amount": "25.00",
            "signed_field_names": fields,
            "signature": signature,
        });
        assert!(verify_signature(&payload, SECRET).is_err());
    }

    #[test]
    fn verifies_signed_callbacks() {
        let id = Uuid::new_v4().to_string();
        let signed = format!("transaction_code=000AWEO,status=COMPLETE,total_amount=25.0,transaction_uuid={id}");
        let signature = sign(SECRET, &signed).unwrap();
        let mut payload = json!({
            "transaction_code": "000AWEO",
            "status": "COMPLETE",
            "total_amount": "25.0",
            "transaction_uuid": id,
            "signed_field_names": "transaction_code,status,total_amount,transaction_uuid",
            "signature": signature,
        });
        assert!(verify_signature(&payload, SECRET).is_ok());

        payload["status"] = json!("FAILED");
        assert!(verify_signature(&payload, SECRET).is_err());
        assert!(verify_signature(&json!({ "status": "COMPLETE" }), SECRET).is_err());
    }

    #[test]
    fn decodes_base64_redirect_data() {
        let raw = json!({ "status": "COMPLETE", "total_amount": 25.0 }).to_string();
        let encoded = STANDARD.encode(raw);
        let payload = decode_redirect_payload(&encoded).unwrap();
        assert_eq!(payload["status"], "COMPLETE");
        assert_eq!(GatewayCallback::from_value(&payload).total_amount.as_deref(), Some("25.0"));

        assert!(decode_redirect_payload("%%%").is_err());
        assert!(decode_redirect_payload(&STANDARD.encode("[1,2]")).is_err());
    }
}
