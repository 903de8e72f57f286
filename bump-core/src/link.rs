//! Fallback deep links: the out-of-band route to a claim when no peer
//! connects. Building and parsing are pure string work.

use crate::claim::ClaimId;

/// Where claim links point when the host has not configured a base URL.
pub const DEFAULT_LINK_BASE: &str = "https://irl.app";

/// Shareable claim URL, suitable for QR rendering: `<base>/claim/<id>`.
pub fn claim_link(base: &str, claim_id: ClaimId) -> String {
    format!("{}/claim/{}", base.trim_end_matches('/'), claim_id)
}

/// Extract the claim ID from a deep link. The path must carry a literal
/// `claim` segment followed by the ID; anything else yields `None`.
pub fn parse_claim_link(url: &str) -> Option<ClaimId> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let path = rest.split_once('/').map(|(_, p)| p)?;
    let path = path.split(['?', '#']).next().unwrap_or("");
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    if segments.next()? != "claim" {
        return None;
    }
    segments.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_roundtrip() {
        let id = ClaimId::generate();
        let url = claim_link("https://irl.app", id);
        assert_eq!(url, format!("https://irl.app/claim/{id}"));
        assert_eq!(parse_claim_link(&url), Some(id));
    }

    #[test]
    fn base_trailing_slash_is_normalized() {
        let id = ClaimId::generate();
        assert_eq!(
            claim_link("https://irl.app/", id),
            format!("https://irl.app/claim/{id}")
        );
    }

    #[test]
    fn query_and_fragment_are_ignored() {
        let id = ClaimId::generate();
        let url = format!("https://irl.app/claim/{id}?src=qr#top");
        assert_eq!(parse_claim_link(&url), Some(id));
    }

    #[test]
    fn missing_claim_segment_is_rejected() {
        let id = ClaimId::generate();
        assert_eq!(parse_claim_link(&format!("https://irl.app/pay/{id}")), None);
        assert_eq!(parse_claim_link("https://irl.app"), None);
        assert_eq!(parse_claim_link("https://irl.app/claim"), None);
        assert_eq!(parse_claim_link("https://irl.app/claim/"), None);
    }

    #[test]
    fn claim_must_be_first_segment() {
        let id = ClaimId::generate();
        let url = format!("https://irl.app/v2/claim/{id}");
        assert_eq!(parse_claim_link(&url), None);
    }

    #[test]
    fn non_uuid_id_is_rejected() {
        assert_eq!(parse_claim_link("https://irl.app/claim/abc123"), None);
    }

    #[test]
    fn garbage_input_does_not_panic() {
        assert_eq!(parse_claim_link(""), None);
        assert_eq!(parse_claim_link("not a url at all"), None);
        assert_eq!(parse_claim_link("://///claim//"), None);
    }

    #[test]
    fn schemeless_path_is_accepted() {
        let id = ClaimId::generate();
        assert_eq!(parse_claim_link(&format!("irl.app/claim/{id}")), Some(id));
    }
}
