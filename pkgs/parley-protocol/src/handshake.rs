//! Websocket handshake parameters

use url::{form_urlencoded, Url};

use crate::error::Result;
use crate::models::UserId;

/// Query parameter identifying the connecting user
pub const USER_ID_PARAM: &str = "userId";

/// Extract the user identity from an upgrade request query string.
///
/// A missing or blank value means the connection is anonymous.
pub fn user_id_from_query(query: Option<&str>) -> Option<UserId> {
    let query = query?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == USER_ID_PARAM)
        .map(|(_, value)| UserId::new(value.trim()))
        .filter(|user_id| !user_id.is_empty())
}

/// Build the socket URL a client dials for `user_id`
pub fn socket_url(base: &str, user_id: &UserId) -> Result<String> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair(USER_ID_PARAM, user_id.as_str());
    Ok(url.to_string())
}
