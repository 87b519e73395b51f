//! UPnP time string conversions.
//!
//! AVTransport and ContentDirectory exchange durations and positions as
//! `H:MM:SS[.fraction]` strings. Devices are sloppy about the hour field
//! width, so parsing accepts any number of digits and zero-pads only
//! minutes and seconds when formatting.

/// Parses a `H:MM:SS[.fraction]` time string into whole seconds.
///
/// The fraction is truncated. Anything with fewer than three
/// colon-separated components is malformed and yields 0, as do sentinel
/// values such as `NOT_IMPLEMENTED` or `-:--:--` whose components are not
/// numeric.
///
/// ```
/// # use pavanedidl::time::parse_upnp_time;
/// assert_eq!(parse_upnp_time("0:01:05.250"), 65);
/// assert_eq!(parse_upnp_time("1:00:00"), 3600);
/// assert_eq!(parse_upnp_time("NOT_IMPLEMENTED"), 0);
/// ```
pub fn parse_upnp_time(value: &str) -> u64 {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() < 3 {
        return 0;
    }

    let hours = parse_component(parts[0]);
    let minutes = parse_component(parts[1]);
    let seconds = parse_component(parts[2].split('.').next().unwrap_or("0"));

    hours * 3600 + minutes * 60 + seconds
}

fn parse_component(raw: &str) -> u64 {
    raw.trim().parse().unwrap_or(0)
}

/// Formats whole seconds as `H:MM:SS`.
///
/// Hours are `seconds / 3600` (unpadded); minutes and seconds come from the
/// remainder and are zero-padded to two digits.
///
/// ```
/// # use pavanedidl::time::format_upnp_time;
/// assert_eq!(format_upnp_time(65), "0:01:05");
/// assert_eq!(format_upnp_time(3661), "1:01:01");
/// ```
pub fn format_upnp_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let remainder = seconds % 3600;
    format!("{}:{:02}:{:02}", hours, remainder / 60, remainder % 60)
}
