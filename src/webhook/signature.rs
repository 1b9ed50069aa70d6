use crate::webhook::event::WebhookEvent;
use crate::webhook::matcher::{named_fn, Matcher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// 簽章標頭名稱
pub const SIGNATURE_HEADER: &str = "X-Up-Signature";

const SCHEME_PREFIX: &str = "sha256=";

fn keyed(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// 產生 `sha256=<hex>` 形式的簽章標頭值
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = keyed(secret.as_bytes());
    mac.update(body);
    format!("{}{}", SCHEME_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// 以常數時間比對驗證簽章
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(signature) = header_value.trim().strip_prefix(SCHEME_PREFIX) else {
        debug!("Signature header does not use the sha256 scheme");
        return false;
    };

    let Ok(expected) = hex::decode(signature) else {
        debug!("Signature header is not valid hex");
        return false;
    };

    let mut mac = keyed(secret.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// 事件是否帶有有效簽章
pub fn has_valid_signature(secret: &str, event: &WebhookEvent) -> bool {
    event
        .header(SIGNATURE_HEADER)
        .map(|value| verify_signature(secret, event.body(), value))
        .unwrap_or(false)
}

/// 只接受簽章有效的事件的匹配器
pub fn signature_matcher(secret: &str) -> Arc<dyn Matcher> {
    let secret = secret.to_string();
    named_fn(format!("valid {} signature", SIGNATURE_HEADER), move |event| {
        has_valid_signature(&secret, event)
    })
}
