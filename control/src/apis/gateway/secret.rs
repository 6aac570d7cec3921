//! TLS Secret snapshots
//!
//! Only `tls.crt` and `tls.key` are kept. A Secret carrying neither is of no
//! interest to listeners and is treated as absent.
//!
//! ```yaml
//! apiVersion: v1
//! kind: Secret
//! metadata:
//!   name: example-com-tls
//! type: kubernetes.io/tls
//! data:
//!   tls.crt: <base64-encoded-cert>
//!   tls.key: <base64-encoded-key>
//! ```

use crate::cache::Secret;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use kube::ResourceExt;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY: &str = "tls.key";

/// Snapshot of a Secret's key material, `None` if it holds none
pub fn tls_secret(secret: &KubeSecret) -> Option<Secret> {
    let data = secret.data.as_ref()?;
    let cert = data.get(TLS_CERT_KEY).map(|b| b.0.clone());
    let key = data.get(TLS_PRIVATE_KEY).map(|b| b.0.clone());
    if cert.is_none() && key.is_none() {
        return None;
    }

    Some(Secret {
        namespace: secret.namespace().unwrap_or_else(|| "default".to_string()),
        name: secret.name_any(),
        cert: cert.unwrap_or_default(),
        key: key.unwrap_or_default(),
    })
}
