//! Identifier derivation.
//!
//! Recomputes, from a URL alone, the probable document id and the 32-bit
//! site hash the cluster stores in its link records. Linkage records can
//! then be validated without asking the cluster for the identifier itself.
//!
//! The probable doc id packs two hashes:
//!
//! ```text
//!  bit 37                   14 13        6 5      0
//! ┌───────────────────────────┬───────────┬────────┐
//! │     hash64(url) bits      │ hash8(dom)│  hash  │
//! └───────────────────────────┴───────────┴────────┘
//! ```

/// Doc ids are 38 bits wide.
pub const DOCID_MASK: u64 = (1 << 38) - 1;

/// Bits 6..=13 carry the domain hash.
const DOMAIN_HASH_SHIFT: u32 = 6;
const DOMAIN_HASH_WINDOW: u64 = 0xff << DOMAIN_HASH_SHIFT;

/// The hash primitives identifiers are built from.
///
/// The cluster derives doc ids and site hashes from its own hash functions.
/// Plug those in through this trait so recomputed identifiers agree with
/// what a real cluster stores.
pub trait IdHasher: Send + Sync + std::fmt::Debug {
    /// 64-bit hash.
    fn hash64(&self, data: &[u8]) -> u64;

    /// 32-bit hash.
    fn hash32(&self, data: &[u8]) -> u32;

    /// 8-bit hash.
    fn hash8(&self, data: &[u8]) -> u8;
}

/// Stand-in hasher built on truncated BLAKE3 digests.
///
/// Deterministic and well distributed, but not the cluster's own hash:
/// link records checked with it only match records this hasher produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Blake3Hasher;

impl IdHasher for Blake3Hasher {
    fn hash64(&self, data: &[u8]) -> u64 {
        let digest = blake3::hash(data);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn hash32(&self, data: &[u8]) -> u32 {
        let digest = blake3::hash(data);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&digest.as_bytes()[..4]);
        u32::from_le_bytes(bytes)
    }

    fn hash8(&self, data: &[u8]) -> u8 {
        blake3::hash(data).as_bytes()[0]
    }
}

/// Scheme-less `host[:port]` of a URL, lowercased, without userinfo.
pub fn authority(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    authority.rsplit_once('@').map_or(authority, |(_, host)| host)
}

/// Host part of a URL, without port.
pub fn host(url: &str) -> &str {
    let authority = authority(url);
    if authority.starts_with('[') {
        // bracketed IPv6 literal
        return authority
            .find(']')
            .map_or(authority, |end| &authority[..=end]);
    }
    authority.split(':').next().unwrap_or(authority)
}

/// Registrable domain: the host with its leftmost two labels dropped.
///
/// Deliberately simple; multi-label public suffixes are not recognized.
/// Hosts with two labels or fewer are returned whole.
pub fn registrable_domain(url: &str) -> &str {
    let host = host(url);
    let mut labels = host.splitn(3, '.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some(_), Some(_), Some(rest)) if !rest.is_empty() => rest,
        _ => host,
    }
}

/// Probable document id of a URL, as the cluster computes it before any
/// collision resolution.
pub fn probable_doc_id_with(hasher: &dyn IdHasher, url: &str) -> u64 {
    let mut doc_id = hasher.hash64(url.as_bytes()) & DOCID_MASK;
    doc_id &= !DOMAIN_HASH_WINDOW;

    let domain = registrable_domain(url).to_ascii_lowercase();
    doc_id |= u64::from(hasher.hash8(domain.as_bytes())) << DOMAIN_HASH_SHIFT;
    doc_id
}

/// 32-bit hash of the URL's authority.
pub fn site_hash32_with(hasher: &dyn IdHasher, url: &str) -> u32 {
    hasher.hash32(authority(url).to_ascii_lowercase().as_bytes())
}

/// [`probable_doc_id_with`] using [`Blake3Hasher`].
pub fn probable_doc_id(url: &str) -> u64 {
    probable_doc_id_with(&Blake3Hasher, url)
}

/// [`site_hash32_with`] using [`Blake3Hasher`].
pub fn site_hash32(url: &str) -> u32 {
    site_hash32_with(&Blake3Hasher, url)
}

/// The domain hash packed into a doc id.
pub fn doc_id_domain_hash(doc_id: u64) -> u8 {
    ((doc_id & DOMAIN_HASH_WINDOW) >> DOMAIN_HASH_SHIFT) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_strips_scheme_path_and_userinfo() {
        assert_eq!(authority("http://a.case1.test:28080/x?y#z"), "a.case1.test:28080");
        assert_eq!(authority("https://user:pw@example.com/"), "example.com");
        assert_eq!(authority("example.com/path"), "example.com");
        assert_eq!(authority("http://example.com"), "example.com");
    }

    #[test]
    fn host_drops_port() {
        assert_eq!(host("http://a.b.c:8080/"), "a.b.c");
        assert_eq!(host("http://[::1]:8080/"), "[::1]");
    }

    #[test]
    fn registrable_domain_drops_two_labels() {
        assert_eq!(registrable_domain("http://a.case1.privacore.test:28080/"), "privacore.test");
        assert_eq!(registrable_domain("http://www.example.com/"), "com");
        assert_eq!(registrable_domain("http://example.com/"), "example.com");
        assert_eq!(registrable_domain("http://localhost/"), "localhost");
    }

    #[test]
    fn doc_id_is_deterministic_and_in_range() {
        let url = "http://a.case1.privacore.test:28080/page.html";
        let first = probable_doc_id(url);
        assert_eq!(first, probable_doc_id(url));
        assert!(first <= DOCID_MASK);
    }

    #[test]
    fn doc_id_carries_domain_hash() {
        let url = "http://a.case1.privacore.test:28080/page.html";
        let doc_id = probable_doc_id(url);
        assert_eq!(doc_id_domain_hash(doc_id), Blake3Hasher.hash8(b"privacore.test"));

        // Same registrable domain, same window.
        let sibling = probable_doc_id("http://b.case2.privacore.test:28080/other.html");
        assert_eq!(doc_id_domain_hash(sibling), doc_id_domain_hash(doc_id));
    }

    #[test]
    fn doc_id_keeps_low_url_hash_bits() {
        let url = "http://x.example/1";
        let doc_id = probable_doc_id(url);
        let raw = Blake3Hasher.hash64(url.as_bytes());
        assert_eq!(doc_id & 0x3f, raw & 0x3f);
        assert_eq!(doc_id >> 14, (raw & DOCID_MASK) >> 14);
    }

    #[test]
    fn site_hash_ignores_path_and_case() {
        assert_eq!(
            site_hash32("http://A.Example.com:80/one"),
            site_hash32("https://a.example.com:80/two?q")
        );
        assert_ne!(
            site_hash32("http://a.example.com/"),
            site_hash32("http://b.example.com/")
        );
    }

    /// Hashes every input to the same constants.
    #[derive(Debug)]
    struct FixedHasher;

    impl IdHasher for FixedHasher {
        fn hash64(&self, _: &[u8]) -> u64 {
            u64::MAX
        }

        fn hash32(&self, _: &[u8]) -> u32 {
            7
        }

        fn hash8(&self, _: &[u8]) -> u8 {
            0x5a
        }
    }

    #[test]
    fn identifiers_follow_the_plugged_in_hasher() {
        let url = "http://a.case1.privacore.test:28080/";
        let doc_id = probable_doc_id_with(&FixedHasher, url);

        assert_eq!(doc_id, (DOCID_MASK & !DOMAIN_HASH_WINDOW) | (0x5a << DOMAIN_HASH_SHIFT));
        assert_eq!(doc_id_domain_hash(doc_id), 0x5a);
        assert_eq!(site_hash32_with(&FixedHasher, url), 7);
        assert_eq!(probable_doc_id(url), probable_doc_id_with(&Blake3Hasher, url));
    }
}
