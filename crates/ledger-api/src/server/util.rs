use axum::http::HeaderMap;
use contracts::OrgContext;

use super::error::HttpApiError;

/// Builds the tenant scope from the `x-org-id` header. A missing or blank
/// header is a caller error; no request proceeds without a tenant.
pub(super) fn org_context(headers: &HeaderMap) -> Result<OrgContext, HttpApiError> {
    headers
        .get("x-org-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(OrgContext::new)
        .ok_or_else(HttpApiError::missing_org_header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_becomes_the_tenant_scope() {
        let mut headers = HeaderMap::new();
        headers.insert("x-org-id", HeaderValue::from_static("org:alpha"));
        let ctx = org_context(&headers).expect("context");
        assert_eq!(ctx.org_id, "org:alpha");
    }

    #[test]
    fn missing_or_blank_header_is_rejected() {
        assert!(org_context(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-org-id", HeaderValue::from_static("   "));
        assert!(org_context(&headers).is_err());
    }
}
