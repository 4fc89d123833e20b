/// Supplies request credentials. Token storage and refresh live with the
/// implementor; the transport only asks for the current values.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    fn tenant_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
    tenant_id: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>, tenant_id: Option<String>) -> Self {
        let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            token: non_blank(token),
            tenant_id: non_blank(tenant_id),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant_id.clone()
    }
}
