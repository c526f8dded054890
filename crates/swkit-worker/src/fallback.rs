//! Placeholder responses for assets that neither cache nor network can serve.

use http::StatusCode;
use swkit_net::{Destination, Response};
use url::Url;

/// 1x1 transparent GIF.
const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// TrueType offset table with zero tables. The page's font stack takes over.
const EMPTY_SFNT: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, // sfnt version 1.0
    0x00, 0x00, // numTables
    0x00, 0x00, // searchRange
    0x00, 0x00, // entrySelector
    0x00, 0x00, // rangeShift
];

/// Content type of the placeholder for `destination`, if it has one.
pub fn content_type_for(destination: Destination) -> Option<&'static str> {
    match destination {
        Destination::Image => Some("image/gif"),
        Destination::Font => Some("font/ttf"),
        Destination::Style => Some("text/css"),
        Destination::Script => Some("text/javascript"),
        Destination::Document | Destination::Other => None,
    }
}

/// Build the placeholder for `destination`.
///
/// `None` means the category has no placeholder and the caller falls back to
/// the offline page.
pub fn synthesize(destination: Destination, url: &Url) -> Option<Response> {
    let content_type = content_type_for(destination)?;
    let body: &'static [u8] = match destination {
        Destination::Image => TRANSPARENT_GIF,
        Destination::Font => EMPTY_SFNT,
        _ => &[],
    };
    Some(Response::with_content_type(
        url.clone(),
        StatusCode::OK,
        content_type,
        body,
    ))
}
