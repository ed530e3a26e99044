//! Device push 渠道 - 标准 Web Push（RFC 8291/8292）
//!
//! 对接收者的每个有效订阅：构建 JSON payload，用 aes128gcm 内容编码
//! 加密，按 push service 的 audience 签 VAPID JWT，POST 到订阅 endpoint。
//! provider 返回 gone/not-found 时把该订阅软删除；至少一个订阅投递成功
//! 则整体成功。VAPID 私钥只进内存，不进日志。

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::notification::channel::ChannelSender;
use crate::notification::model::{DispatchResult, Notification};
use crate::prefs::{PreferenceStore, Subscription};

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const MAX_TITLE_CHARS: usize = 120;
const MAX_BODY_CHARS: usize = 600;
const JWT_LIFETIME_SECS: i64 = 12 * 60 * 60;
const JWT_RENEW_SKEW_SECS: i64 = 60;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Device push 渠道配置（VAPID 应用密钥对）
#[derive(Clone)]
pub struct WebPushConfig {
    public_key_b64: String,
    private_key_raw: [u8; 32],
    subject: String,
    /// 单次 provider 请求超时（秒）
    pub timeout_secs: u64,
}

// 手写 Debug，避免私钥进日志
impl std::fmt::Debug for WebPushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPushConfig")
            .field("public_key_b64", &self.public_key_b64)
            .field("subject", &self.subject)
            .field("private_key_raw", &"<redacted>")
            .finish()
    }
}

impl WebPushConfig {
    pub fn new(
        public_key_b64: impl Into<String>,
        private_key_b64: &str,
        subject: impl Into<String>,
    ) -> Result<Self> {
        let public_key_b64 = public_key_b64.into();
        let public_raw = decode_b64url(&public_key_b64)
            .map_err(|e| Error::config(format!("Invalid VAPID public key: {e}")))?;
        if public_raw.len() != PUBLIC_KEY_LEN {
            return Err(Error::config(format!(
                "VAPID public key must decode to {PUBLIC_KEY_LEN} bytes"
            )));
        }
        let private_raw: [u8; 32] = decode_b64url(private_key_b64)
            .map_err(|e| Error::config(format!("Invalid VAPID private key: {e}")))?
            .try_into()
            .map_err(|_| Error::config("VAPID private key must decode to 32 bytes"))?;

        Ok(Self {
            public_key_b64,
            private_key_raw: private_raw,
            subject: subject.into(),
            timeout_secs: 5,
        })
    }

    /// 从环境变量读取；密钥对未配置时返回 None（渠道不启用）
    pub fn from_env() -> Result<Option<Self>> {
        let public = read_env("FOYER_VAPID_PUBLIC_KEY");
        let private = read_env("FOYER_VAPID_PRIVATE_KEY");

        let (public, private) = match (public, private) {
            (None, None) => return Ok(None),
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(Error::config(
                    "Both FOYER_VAPID_PUBLIC_KEY and FOYER_VAPID_PRIVATE_KEY must be set",
                ));
            }
        };
        let subject =
            read_env("FOYER_VAPID_SUBJECT").unwrap_or_else(|| "mailto:admin@localhost".to_string());

        Self::new(public, &private, subject).map(Some)
    }

    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
struct CachedJwt {
    token: String,
    expires_unix: i64,
}

/// Device push 渠道
pub struct WebPushSender {
    config: WebPushConfig,
    client: reqwest::Client,
    prefs: Arc<PreferenceStore>,
    /// audience -> 已签发的 VAPID JWT
    jwt_cache: DashMap<String, CachedJwt>,
}

impl WebPushSender {
    pub fn new(config: WebPushConfig, prefs: Arc<PreferenceStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            prefs,
            jwt_cache: DashMap::new(),
        })
    }

    async fn send_to_subscription(
        &self,
        sub: &Subscription,
        payload: &[u8],
        urgency: &'static str,
    ) -> Result<()> {
        let audience = push_service_audience(&sub.endpoint)?;
        let jwt = self.vapid_jwt(&audience)?;

        let client_public: [u8; PUBLIC_KEY_LEN] = decode_b64url(&sub.p256dh)
            .map_err(|e| Error::transport("web_push", format!("invalid p256dh key: {e}")))?
            .try_into()
            .map_err(|_| Error::transport("web_push", "invalid p256dh key length"))?;
        let client_auth: [u8; AUTH_SECRET_LEN] = decode_b64url(&sub.auth)
            .map_err(|e| Error::transport("web_push", format!("invalid auth secret: {e}")))?
            .try_into()
            .map_err(|_| Error::transport("web_push", "invalid auth secret length"))?;

        let sealed = seal_aes128gcm(payload, &client_public, &client_auth)?;

        let response = self
            .client
            .post(&sub.endpoint)
            .header("TTL", "3600")
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header("Encryption", format!("salt={}", sealed.salt_b64))
            .header(
                "Crypto-Key",
                format!(
                    "dh={}; p256ecdsa={}",
                    sealed.dh_b64, self.config.public_key_b64
                ),
            )
            .header(
                "Authorization",
                format!("vapid t={}, k={}", jwt, self.config.public_key_b64),
            )
            .header("Urgency", urgency)
            .body(sealed.body)
            .send()
            .await
            .map_err(|e| Error::transport("web_push", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            if let Err(e) = self.prefs.mark_delivered(&sub.endpoint).await {
                debug!(error = %e, "Failed to record last_used");
            }
            return Ok(());
        }

        // 订阅已失效：只软删除这一个订阅
        if status.as_u16() == 404 || status.as_u16() == 410 {
            info!(
                endpoint = %sub.endpoint,
                status = %status,
                "Push subscription gone, deactivating"
            );
            if let Err(e) = self.prefs.deactivate_endpoint(&sub.endpoint).await {
                warn!(endpoint = %sub.endpoint, error = %e, "Failed to deactivate subscription");
            }
            return Err(Error::transport(
                "web_push",
                format!("subscription gone (HTTP {status})"),
            ));
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(Error::transport(
            "web_push",
            format!("HTTP {status}: {}", truncate_chars(&body_text, 300)),
        ))
    }

    fn vapid_jwt(&self, audience: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        if let Some(cached) = self.jwt_cache.get(audience) {
            if cached.expires_unix - JWT_RENEW_SKEW_SECS > now {
                return Ok(cached.token.clone());
            }
        }

        let expires_unix = now + JWT_LIFETIME_SECS;
        let token = sign_vapid_jwt(
            audience,
            &self.config.subject,
            &self.config.private_key_raw,
            expires_unix,
        )?;
        self.jwt_cache.insert(
            audience.to_string(),
            CachedJwt {
                token: token.clone(),
                expires_unix,
            },
        );
        Ok(token)
    }
}

#[async_trait]
impl ChannelSender for WebPushSender {
    fn name(&self) -> &'static str {
        "web_push"
    }

    async fn send(&self, notification: &Notification) -> DispatchResult {
        let subscriptions = match self
            .prefs
            .active_subscriptions(&notification.recipient_id)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                warn!(channel = "web_push", error = %e, "Failed to load subscriptions");
                return DispatchResult::failed("web_push", e.to_string(), &notification.id);
            }
        };

        if subscriptions.is_empty() {
            return DispatchResult::failed(
                "web_push",
                "no active subscriptions",
                &notification.id,
            );
        }

        let payload = match PushPayload::from_notification(notification).into_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return DispatchResult::failed("web_push", e.to_string(), &notification.id),
        };

        let urgency = priority_to_urgency(notification.priority);
        let attempts = join_all(
            subscriptions
                .iter()
                .map(|sub| self.send_to_subscription(sub, &payload, urgency)),
        )
        .await;

        let delivered = attempts.iter().filter(|r| r.is_ok()).count();
        if delivered > 0 {
            info!(
                channel = "web_push",
                recipient = %notification.recipient_id,
                delivered,
                total = subscriptions.len(),
                "Device push delivered"
            );
            return DispatchResult::sent("web_push", &notification.id);
        }

        let detail = attempts
            .iter()
            .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
            .collect::<Vec<_>>()
            .join("; ");
        DispatchResult::failed("web_push", detail, &notification.id)
    }
}

/// Provider 收到的明文 payload（加密前）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    title: String,
    body: String,
    icon: String,
    badge: String,
    tag: String,
    data: PushData,
    actions: Vec<PushAction>,
    vibrate: Vec<u32>,
    require_interaction: bool,
    silent: bool,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct PushData {
    url: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct PushAction {
    action: String,
    title: String,
}

impl PushPayload {
    fn from_notification(n: &Notification) -> Self {
        let url = n
            .actions
            .first()
            .and_then(|a| a.url.clone())
            .unwrap_or_else(|| "/".to_string());
        Self {
            title: truncate_chars(&n.title, MAX_TITLE_CHARS),
            body: truncate_chars(&n.body, MAX_BODY_CHARS),
            icon: n
                .icon
                .clone()
                .unwrap_or_else(|| "/icons/icon-192.png".to_string()),
            badge: "/icons/badge-72.png".to_string(),
            tag: n.dedup_key.clone(),
            data: PushData {
                url,
                kind: n.category.as_str().to_string(),
            },
            actions: n
                .actions
                .iter()
                .map(|a| PushAction {
                    action: a.action.clone(),
                    title: a.title.clone(),
                })
                .collect(),
            vibrate: if n.priority >= 5 {
                vec![200, 100, 200]
            } else {
                vec![100]
            },
            require_interaction: n.priority >= 5,
            silent: n.priority <= 2,
            timestamp: n.created_at.timestamp_millis(),
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self)?)
    }
}

/// 加密结果与随之发送的头部材料
struct SealedMessage {
    body: Vec<u8>,
    salt_b64: String,
    dh_b64: String,
}

/// Urgency 头：broker 1-5 优先级映射到 push service 的四档
fn priority_to_urgency(priority: u8) -> &'static str {
    match priority {
        5 => "high",
        3 | 4 => "normal",
        2 => "low",
        _ => "very-low",
    }
}

/// aes128gcm 内容加密（RFC 8291）
fn seal_aes128gcm(
    plaintext: &[u8],
    client_public: &[u8; PUBLIC_KEY_LEN],
    client_auth: &[u8; AUTH_SECRET_LEN],
) -> Result<SealedMessage> {
    if plaintext.is_empty() {
        return Err(Error::transport("web_push", "payload cannot be empty"));
    }

    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let remote = p256::PublicKey::from_sec1_bytes(client_public)
        .map_err(|_| Error::transport("web_push", "invalid client public key"))?;
    let local_secret = EphemeralSecret::random(&mut rng);
    let local_public = p256::PublicKey::from(&local_secret).to_encoded_point(false);
    let local_public: [u8; PUBLIC_KEY_LEN] = local_public
        .as_bytes()
        .try_into()
        .map_err(|_| Error::transport("web_push", "unexpected local key length"))?;

    let shared = local_secret.diffie_hellman(&remote);

    // ikm_info = "WebPush: info\0" || client_public || local_public
    let mut ikm_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    ikm_info.extend_from_slice(IKM_INFO_PREFIX);
    ikm_info.extend_from_slice(client_public);
    ikm_info.extend_from_slice(&local_public);

    let ikm = hkdf_sha256(client_auth, shared.raw_secret_bytes().as_slice(), &ikm_info, 32)?;
    let cek = hkdf_sha256(&salt, &ikm, CEK_INFO, 16)?;
    let nonce = hkdf_sha256(&salt, &ikm, NONCE_INFO, 12)?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| Error::transport("web_push", "invalid content encryption key"))?;

    // 单记录消息：填充一个终止分隔符字节
    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(2);

    let nonce_arr: [u8; 12] = nonce
        .as_slice()
        .try_into()
        .map_err(|_| Error::transport("web_push", "unexpected nonce length"))?;
    let ciphertext = cipher
        .encrypt((&nonce_arr).into(), padded.as_slice())
        .map_err(|_| Error::transport("web_push", "content encryption failed"))?;

    // aes128gcm 头：salt || record_size || key_len || local_public || ciphertext
    let mut body =
        Vec::with_capacity(SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&local_public);
    body.extend_from_slice(&ciphertext);

    Ok(SealedMessage {
        body,
        salt_b64: encode_b64url(&salt),
        dh_b64: encode_b64url(&local_public),
    })
}

/// VAPID JWT（RFC 8292，ES256）
fn sign_vapid_jwt(
    audience: &str,
    subject: &str,
    private_key_raw: &[u8; 32],
    expires_unix: i64,
) -> Result<String> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: i64,
        sub: &'a str,
    }

    let header = encode_b64url(br#"{"typ":"JWT","alg":"ES256"}"#);
    let claims = encode_b64url(
        serde_json::to_string(&Claims {
            aud: audience,
            exp: expires_unix,
            sub: subject,
        })?
        .as_bytes(),
    );
    let signing_input = format!("{header}.{claims}");

    let signing_key = SigningKey::from_bytes(private_key_raw.into())
        .map_err(|_| Error::config("invalid VAPID private key"))?;
    let signature: p256::ecdsa::Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!(
        "{signing_input}.{}",
        encode_b64url(signature.to_bytes().as_slice())
    ))
}

/// JWT audience：endpoint 的 scheme://host[:port]
fn push_service_audience(endpoint: &str) -> Result<String> {
    let parsed = Url::parse(endpoint)
        .map_err(|e| Error::transport("web_push", format!("invalid endpoint URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::transport("web_push", "endpoint missing host"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input.as_bytes())
}

fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::transport("web_push", "HKDF expand failed"))?;
    Ok(okm)
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}
