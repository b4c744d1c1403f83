//! Input validation for destination registration and updates.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::header::{HeaderName, HeaderValue};
use url::{Host, Url};

use crate::error::WebhookError;
use crate::events::EventType;

/// Upper bound on subscribed event types per destination.
pub const MAX_EVENT_TYPES: usize = 20;

/// Upper bound on custom request headers per destination.
pub const MAX_CUSTOM_HEADERS: usize = 10;

/// Upper bound on a custom header value.
pub const MAX_HEADER_VALUE_LEN: usize = 1024;

/// Upper bound on the destination URL.
pub const MAX_URL_LEN: usize = 2048;

/// Headers owned by the delivery engine; custom headers may not shadow them.
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "content-type",
    "content-length",
    "user-agent",
    "x-webhook-signature",
    "x-webhook-event",
    "x-webhook-delivery",
    "x-webhook-timestamp",
];

/// Validate a destination URL.
///
/// Plaintext-transport schemes are rejected; only `https` is accepted, and
/// hosts that resolve into internal address space are refused so a tenant
/// cannot point a webhook at infrastructure.
///
/// `allow_insecure` relaxes both rules (plain `http`, loopback hosts) for
/// local development and test harnesses.
pub fn validate_destination_url(url: &str, allow_insecure: bool) -> Result<(), WebhookError> {
    if url.len() > MAX_URL_LEN {
        return Err(WebhookError::InvalidUrl(format!(
            "URL exceeds {MAX_URL_LEN} characters"
        )));
    }

    let parsed = Url::parse(url).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "plaintext http is not allowed; use https".to_string(),
            ));
        }
        other => {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported scheme '{other}'; use https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| WebhookError::InvalidUrl("URL has no host".to_string()))?;

    if !allow_insecure {
        validate_host_not_internal(&host)?;
    }

    Ok(())
}

/// Reject hosts in loopback, private, link-local, or carrier-grade NAT space,
/// plus the conventional internal DNS suffixes.
fn validate_host_not_internal(host: &Host<&str>) -> Result<(), WebhookError> {
    match host {
        Host::Ipv4(ip) => {
            if is_internal_ipv4(*ip) {
                return Err(WebhookError::InvalidUrl(format!(
                    "host {ip} is in internal address space"
                )));
            }
        }
        Host::Ipv6(ip) => {
            if is_internal_ipv6(*ip) {
                return Err(WebhookError::InvalidUrl(format!(
                    "host {ip} is in internal address space"
                )));
            }
        }
        Host::Domain(name) => {
            let lower = name.to_ascii_lowercase();
            if lower == "localhost"
                || lower.ends_with(".localhost")
                || lower.ends_with(".local")
                || lower.ends_with(".internal")
            {
                return Err(WebhookError::InvalidUrl(format!(
                    "host {name} is not routable from the delivery network"
                )));
            }
            // Domains resolving to an IP literal still get caught above when
            // written as such; DNS-level pinning is the egress proxy's job.
            if let Ok(ip) = lower.parse::<IpAddr>() {
                return match ip {
                    IpAddr::V4(v4) if is_internal_ipv4(v4) => Err(WebhookError::InvalidUrl(
                        format!("host {ip} is in internal address space"),
                    )),
                    IpAddr::V6(v6) if is_internal_ipv6(v6) => Err(WebhookError::InvalidUrl(
                        format!("host {ip} is in internal address space"),
                    )),
                    _ => Ok(()),
                };
            }
        }
    }
    Ok(())
}

fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(mapped);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (segments[0] & 0xFE00) == 0xFC00
        // fe80::/10 link local
        || (segments[0] & 0xFFC0) == 0xFE80
}

/// Whether a header name belongs to the delivery engine's reserved set.
pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Validate and normalize a subscription list: non-empty, bounded, every
/// entry in the catalog, duplicates removed with order preserved.
pub fn validate_event_types(event_types: &[String]) -> Result<Vec<String>, WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "at least one event type is required".to_string(),
        ));
    }
    if event_types.len() > MAX_EVENT_TYPES {
        return Err(WebhookError::Validation(format!(
            "at most {MAX_EVENT_TYPES} event types per destination"
        )));
    }

    let mut normalized = Vec::with_capacity(event_types.len());
    for raw in event_types {
        let event_type = EventType::parse(raw)
            .ok_or_else(|| WebhookError::InvalidEventType(raw.clone()))?;
        let name = event_type.as_str().to_string();
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }

    Ok(normalized)
}

/// Validate custom request headers: syntactically valid names and values,
/// bounded count and size, reserved names refused.
pub fn validate_custom_headers(headers: &HashMap<String, String>) -> Result<(), WebhookError> {
    if headers.len() > MAX_CUSTOM_HEADERS {
        return Err(WebhookError::InvalidHeader(format!(
            "at most {MAX_CUSTOM_HEADERS} custom headers per destination"
        )));
    }

    for (name, value) in headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(WebhookError::InvalidHeader(format!(
                "'{name}' is not a valid header name"
            )));
        }
        if is_reserved_header(name) {
            return Err(WebhookError::InvalidHeader(format!(
                "'{name}' is set by the delivery engine and cannot be overridden"
            )));
        }
        if value.len() > MAX_HEADER_VALUE_LEN {
            return Err(WebhookError::InvalidHeader(format!(
                "value for '{name}' exceeds {MAX_HEADER_VALUE_LEN} bytes"
            )));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(WebhookError::InvalidHeader(format!(
                "value for '{name}' contains invalid characters"
            )));
        }
    }

    Ok(())
}
