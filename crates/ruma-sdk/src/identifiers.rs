//! Matrix identifier and content-URI helpers.
//!
//! Parsing and grammar validation is delegated entirely to [`ruma_common`]; this module only adds
//! the small amount of client-facing convenience the source SDK exposes: turning a loose string
//! into a validated [`OwnedUserId`], and resolving a `mxc://` content URI against the configured
//! homeserver into an HTTP download or thumbnail URL.

use ruma_common::{IdParseError, MxcUri, OwnedUserId, UserId};

/// Parses `id` as a fully-qualified Matrix user ID (`@localpart:domain`).
pub fn parse_user_id(id: &str) -> Result<OwnedUserId, IdParseError> {
    UserId::parse(id).map(ToOwned::to_owned)
}

/// Returns `true` if `id` is a syntactically valid Matrix user ID.
pub fn is_valid_matrix_id(id: &str) -> bool {
    UserId::parse(id).is_ok()
}

/// The resampling filter used when requesting a thumbnail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailMethod {
    /// Crop to the requested dimensions.
    Crop,
    /// Scale to fit within the requested dimensions.
    Scale,
}

impl ThumbnailMethod {
    fn as_query_value(self) -> &'static str {
        match self {
            ThumbnailMethod::Crop => "crop",
            ThumbnailMethod::Scale => "scale",
        }
    }
}

/// Resolves a `mxc://` content URI into a downloadable HTTP(S) URL against `homeserver`.
///
/// Returns `None` if `mxc_uri` is not a well-formed content URI.
pub fn mxc_to_download_url(mxc_uri: &MxcUri, homeserver: &str) -> Option<String> {
    let (server_name, media_id) = mxc_uri.parts().ok()?;
    let homeserver = homeserver.trim_end_matches('/');
    Some(format!(
        "{homeserver}/_matrix/client/v1/media/download/{server_name}/{media_id}"
    ))
}

/// Resolves a `mxc://` content URI into a thumbnail HTTP(S) URL against `homeserver`.
///
/// Returns `None` if `mxc_uri` is not a well-formed content URI.
pub fn mxc_to_thumbnail_url(
    mxc_uri: &MxcUri,
    homeserver: &str,
    width: u32,
    height: u32,
    method: ThumbnailMethod,
) -> Option<String> {
    let (server_name, media_id) = mxc_uri.parts().ok()?;
    let homeserver = homeserver.trim_end_matches('/');
    Some(format!(
        "{homeserver}/_matrix/client/v1/media/thumbnail/{server_name}/{media_id}?width={width}&height={height}&method={method}",
        method = method.as_query_value(),
    ))
}

#[cfg(test)]
mod tests {
    use ruma_common::mxc_uri;

    use super::*;

    #[test]
    fn parses_valid_user_id() {
        let id = parse_user_id("@alice:example.org").unwrap();
        assert_eq!(id.localpart(), "alice");
    }

    #[test]
    fn rejects_user_id_without_sigil() {
        assert!(parse_user_id("alice:example.org").is_err());
        assert!(!is_valid_matrix_id("alice:example.org"));
    }

    #[test]
    fn resolves_download_url() {
        let uri = mxc_uri!("mxc://example.org/abc123");
        let url = mxc_to_download_url(uri, "https://matrix.example.org/").unwrap();
        assert_eq!(
            url,
            "https://matrix.example.org/_matrix/client/v1/media/download/example.org/abc123"
        );
    }

    #[test]
    fn resolves_thumbnail_url() {
        let uri = mxc_uri!("mxc://example.org/abc123");
        let url =
            mxc_to_thumbnail_url(uri, "https://matrix.example.org", 64, 64, ThumbnailMethod::Crop)
                .unwrap();
        assert_eq!(
            url,
            "https://matrix.example.org/_matrix/client/v1/media/thumbnail/example.org/abc123?width=64&height=64&method=crop"
        );
    }

    #[test]
    fn invalid_content_uri_resolves_to_none() {
        let uri = <&MxcUri>::from("not-an-mxc-uri");
        assert!(mxc_to_download_url(uri, "https://example.org").is_none());
    }
}
