//! Linear signature scanning.

use crate::error::{Error, Result};
use crate::module::ModuleInfo;
use crate::pattern::BytePattern;

/// Find the byte offset of the first match of `pattern` in `region`.
///
/// The scan is a plain linear walk over every candidate offset. Signatures
/// are short and each module is scanned once at startup, so the guaranteed
/// lowest-offset result matters more than scan speed; feature code relies
/// on it when a prologue repeats elsewhere in the module.
///
/// Returns `None` when the pattern is longer than the region or nothing
/// matches.
pub fn find(region: &[u8], pattern: &BytePattern) -> Option<usize> {
    if pattern.len() > region.len() {
        return None;
    }

    (0..=region.len() - pattern.len()).find(|&offset| pattern.matches(&region[offset..]))
}

/// Scan a loaded module's image for `pattern`, returning the absolute
/// address of the first match. `name` labels the search in the error.
///
/// # Safety
///
/// `module` must describe a module mapped in the current process whose
/// image stays mapped at `base` for `size` bytes for the duration of the
/// call.
pub unsafe fn find_in_module(
    module: &ModuleInfo,
    name: &str,
    pattern: &BytePattern,
) -> Result<usize> {
    // SAFETY: the caller guarantees the image is mapped at base for size
    // bytes.
    let image = unsafe { std::slice::from_raw_parts(module.base as *const u8, module.size) };

    find(image, pattern)
        .map(|offset| module.base + offset)
        .ok_or_else(|| Error::PatternNotMatched {
            name: name.to_string(),
            module: module.name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_with_wildcard() {
        let region = [0xAA, 0xBB, 0xCC, 0xDD];
        let pattern = BytePattern::from_hex("AA ?? CC DD").unwrap();
        assert_eq!(find(&region, &pattern), Some(0));
    }

    #[test]
    fn pattern_longer_than_region_is_not_found() {
        let region = [0xAA, 0xBB, 0xCC];
        let pattern = BytePattern::from_hex("AA BB CC DD").unwrap();
        assert_eq!(find(&region, &pattern), None);
    }

    #[test]
    fn returns_first_of_repeated_matches() {
        let mut region = vec![0u8; 40];
        region[0] = 0x55;
        region[1] = 0x8B;
        region[2] = 0xEC;
        region[20] = 0x55;
        region[21] = 0x8B;
        region[22] = 0xEC;
        let pattern = BytePattern::from_hex("55 8B EC").unwrap();
        assert_eq!(find(&region, &pattern), Some(0));
    }

    #[test]
    fn finds_match_in_the_middle() {
        let region = [0x00, 0x00, 0x55, 0x8B, 0xEC, 0x00];
        let pattern = BytePattern::from_hex("55 8B EC").unwrap();
        assert_eq!(find(&region, &pattern), Some(2));
    }

    #[test]
    fn finds_match_at_region_end() {
        let region = [0x00, 0x00, 0x55, 0x8B, 0xEC];
        let pattern = BytePattern::from_hex("55 8B EC").unwrap();
        assert_eq!(find(&region, &pattern), Some(2));
    }

    #[test]
    fn no_match_returns_none() {
        let region = [0x11, 0x22, 0x33, 0x44];
        let pattern = BytePattern::from_hex("55 8B").unwrap();
        assert_eq!(find(&region, &pattern), None);
    }

    #[test]
    fn scan_is_idempotent() {
        let region = [0x00, 0x55, 0x8B, 0xEC, 0x55, 0x8B, 0xEC];
        let pattern = BytePattern::from_hex("55 8B EC").unwrap();
        let first = find(&region, &pattern);
        let second = find(&region, &pattern);
        assert_eq!(first, Some(1));
        assert_eq!(first, second);
    }

    #[test]
    fn wildcard_never_rejects_a_candidate() {
        let region = [0x90, 0x01, 0x90, 0x02];
        let pattern = BytePattern::from_hex("90 ??").unwrap();
        assert_eq!(find(&region, &pattern), Some(0));
    }

    #[test]
    fn find_in_module_maps_miss_to_error() {
        let image = vec![0u8; 64];
        let module = ModuleInfo {
            name: "host.dll".to_string(),
            base: image.as_ptr() as usize,
            size: image.len(),
        };
        let pattern = BytePattern::from_hex("DE AD BE EF").unwrap();
        let err = unsafe { find_in_module(&module, "Missing", &pattern) }.unwrap_err();
        assert!(matches!(err, Error::PatternNotMatched { .. }));
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn find_in_module_returns_absolute_address() {
        let mut image = vec![0u8; 64];
        image[10] = 0xC3;
        let module = ModuleInfo {
            name: "host.dll".to_string(),
            base: image.as_ptr() as usize,
            size: image.len(),
        };
        let pattern = BytePattern::from_hex("C3").unwrap();
        let addr = unsafe { find_in_module(&module, "Ret", &pattern) }.unwrap();
        assert_eq!(addr, module.base + 10);
    }
}
