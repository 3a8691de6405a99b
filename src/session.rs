pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";
/// Identity subject (`provider|id`) of the signed-in user.
pub const SUBJECT: &str = "subject";
