//! Default request priority classification.

use spdy::Priority;
use tracing::warn;

/// Classify a request target into a default priority, following the
/// browser convention: pages first, then CSS, then scripts, then images.
/// Everything else lands in the middle; a target that does not parse as a
/// URL gets a distinct low priority of its own.
pub fn default_priority(target: &str) -> Priority {
    let Some(path) = parse_target(target) else {
        warn!(%target, "failed to parse request target, using priority 4");
        return Priority::new(4);
    };

    // Drop the query and fragment before looking at the suffix.
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    const IMAGES: [&str; 10] = [
        ".ico", ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".bmp", ".tiff", ".apng",
    ];

    if path.ends_with('/') || path.ends_with(".html") || path.ends_with(".xhtml") {
        Priority::new(0)
    } else if path.ends_with(".css") {
        Priority::new(1)
    } else if path.ends_with(".js") || path.ends_with(".javascript") {
        Priority::new(2)
    } else if IMAGES.iter().any(|suffix| path.ends_with(suffix)) {
        Priority::new(3)
    } else {
        Priority::new(2)
    }
}

/// Validate a request target and extract its path component. `None` means
/// the target would not survive a URL parser: control characters, raw
/// spaces, and malformed percent-escapes reject the whole target.
fn parse_target(target: &str) -> Option<&str> {
    let bytes = target.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte.is_ascii_control() || byte == b' ' {
            return None;
        }
        if byte == b'%' {
            if bytes.len() - i < 3
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return None;
            }
            i += 3;
            continue;
        }
        i += 1;
    }

    // Absolute targets: skip past scheme and host.
    if let Some(pos) = target.find("://") {
        return match target[pos + 3..].find('/') {
            Some(slash) => Some(&target[pos + 3 + slash..]),
            None => Some("/"),
        };
    }
    Some(target)
}
