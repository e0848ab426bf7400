use crate::model::CallerContext;
use crate::rpc::RpcError;

/// Turns the master key presented with a request into a caller context.
///
/// No key means an ordinary client. The configured key means the server
/// context. Any other key is refused.
#[derive(Debug, Clone)]
pub struct MasterKeyAuth {
    master_key: String,
}

impl MasterKeyAuth {
    pub fn new(master_key: String) -> Self {
        Self { master_key }
    }

    pub fn authorize(&self, presented: Option<&str>) -> Result<CallerContext, RpcError> {
        match presented {
            None | Some("") => Ok(CallerContext::client()),
            Some(key) if constant_time_eq(key.as_bytes(), self.master_key.as_bytes()) => {
                Ok(CallerContext::server())
            }
            Some(_) => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(RpcError::unauthorized())
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_client() {
        let auth = MasterKeyAuth::new("secret".into());
        assert_eq!(auth.authorize(None).unwrap(), CallerContext::client());
        assert_eq!(auth.authorize(Some("")).unwrap(), CallerContext::client());
    }

    #[test]
    fn master_key_is_server() {
        let auth = MasterKeyAuth::new("secret".into());
        assert!(auth.authorize(Some("secret")).unwrap().privileged);
    }

    #[test]
    fn wrong_key_refused() {
        let auth = MasterKeyAuth::new("secret".into());
        let err = auth.authorize(Some("secreT")).unwrap_err();
        assert_eq!(err.code, 401);
        assert!(auth.authorize(Some("secret2")).is_err());
    }
}
