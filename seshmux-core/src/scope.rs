//! Cookie-scope classification for hostnames.
//!
//! A domain is a *valid cookie scope* when it is specific enough to own
//! cookies: `localhost`, a well-formed IP literal, a private single-label
//! name, or a registrable name below a public suffix. Bare public suffixes
//! (`com`, `co.uk`) are never valid scopes: a cookie stored at one would
//! match every registrable domain beneath it.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Classification of a hostname for cookie-scoping purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostClass {
    /// `localhost`.
    Localhost,
    /// A syntactically valid IPv4 or IPv6 literal.
    IpAddress,
    /// Dot-separated numeric labels that fail strict IP validation
    /// (e.g. `256.1.1.1`).
    MalformedIp,
    /// A single label that is not a recognized public suffix
    /// (e.g. `intranet`).
    PrivateSingleLabel,
    /// A bare public suffix, single- or multi-label (`com`, `co.uk`).
    PublicSuffix,
    /// A multi-label name below a recognized or unknown suffix.
    Registrable,
}

impl HostClass {
    /// Whether a host of this class may own cookies.
    #[must_use]
    pub fn is_valid_scope(self) -> bool {
        !matches!(self, HostClass::MalformedIp | HostClass::PublicSuffix)
    }
}

/// Classifies `host` for cookie-scoping purposes.
///
/// `host` is interpreted case-insensitively; a single trailing dot is
/// ignored.
#[must_use]
pub fn classify(host: &str) -> HostClass {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return HostClass::MalformedIp;
    }

    if host == "localhost" {
        return HostClass::Localhost;
    }

    // IPv6, with or without brackets.
    if host.starts_with('[') || host.contains(':') {
        let inner = host.trim_start_matches('[').trim_end_matches(']');
        return if inner.parse::<Ipv6Addr>().is_ok() {
            HostClass::IpAddress
        } else {
            HostClass::MalformedIp
        };
    }

    // IPv4-shaped: every label is purely numeric. Validate strictly so that
    // `256.1.1.1` and `1.2.3.4.5` do not slip through as domain names.
    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit())) {
        return if labels.len() == 4 && host.parse::<Ipv4Addr>().is_ok() {
            HostClass::IpAddress
        } else {
            HostClass::MalformedIp
        };
    }

    if labels.iter().any(|l| l.is_empty()) {
        return HostClass::MalformedIp;
    }

    if labels.len() == 1 {
        return if is_single_label_suffix(labels[0]) {
            HostClass::PublicSuffix
        } else {
            HostClass::PrivateSingleLabel
        };
    }

    // The whole name may itself be a registered multi-label suffix.
    if labels.len() == 2 && is_multi_label_suffix(&host) {
        return HostClass::PublicSuffix;
    }

    HostClass::Registrable
}

/// Whether `host` is specific enough to own cookies.
#[must_use]
pub fn is_valid_cookie_scope(host: &str) -> bool {
    classify(host).is_valid_scope()
}

/// Whether `domain` is exactly a recognized public suffix.
#[must_use]
pub fn is_public_suffix(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    match domain.split('.').count() {
        1 => is_single_label_suffix(&domain),
        2 => is_multi_label_suffix(&domain),
        _ => false,
    }
}

fn is_single_label_suffix(label: &str) -> bool {
    SINGLE_LABEL_SUFFIXES.contains(&label)
}

fn is_multi_label_suffix(name: &str) -> bool {
    MULTI_LABEL_SUFFIXES.contains(&name)
}

// Built-in suffix tables covering the common gTLDs, ccTLDs, and two-label
// country suffixes, plus the IANA reserved names. A host may swap in a full
// Public Suffix List; the contract stays "reject bare suffixes, accept more
// specific names".
#[rustfmt::skip]
static SINGLE_LABEL_SUFFIXES: &[&str] = &[
    // Original and sponsored gTLDs.
    "aero", "arpa", "asia", "biz", "cat", "com", "coop", "edu", "gov", "info",
    "int", "jobs", "mil", "mobi", "museum", "name", "net", "org", "post",
    "pro", "tel", "travel", "xxx",
    // Reserved names.
    "example", "invalid", "local", "onion", "test",
    // Common newer gTLDs.
    "academy", "agency", "app", "art", "bar", "bargains", "bike", "bio",
    "blog", "blue", "boutique", "build", "builders", "buzz", "cab", "cafe",
    "camera", "camp", "capital", "cards", "care", "careers", "cash", "casino",
    "center", "chat", "cheap", "church", "city", "claims", "cleaning",
    "clinic", "clothing", "cloud", "club", "coach", "codes", "coffee",
    "community", "company", "computer", "condos", "construction",
    "consulting", "contractors", "cool", "coupons", "credit", "cruises",
    "dance", "dating", "deals", "degree", "delivery", "dental", "design",
    "dev", "diamonds", "digital", "direct", "directory", "discount", "dog",
    "domains", "education", "email", "energy", "engineering", "enterprises",
    "equipment", "estate", "events", "exchange", "expert", "exposed",
    "express", "fail", "farm", "finance", "financial", "fish", "fitness",
    "flights", "florist", "football", "forsale", "foundation", "fund",
    "furniture", "fyi", "gallery", "games", "gifts", "glass", "global",
    "gold", "golf", "graphics", "green", "group", "guide", "guru", "haus",
    "healthcare", "hockey", "holdings", "holiday", "host", "house", "immo",
    "industries", "institute", "insure", "international", "investments",
    "jewelry", "kitchen", "land", "lawyer", "lease", "legal", "life",
    "lighting", "limited", "limo", "link", "live", "loans", "ltd", "maison",
    "management", "market", "marketing", "mba", "media", "memorial", "money",
    "mortgage", "movie", "network", "news", "ninja", "one", "online",
    "partners", "parts", "photography", "photos", "pictures", "pizza",
    "place", "plumbing", "plus", "productions", "properties", "pub",
    "recipes", "rehab", "rentals", "repair", "report", "restaurant",
    "reviews", "rocks", "run", "sale", "salon", "school", "services",
    "shoes", "shop", "shopping", "show", "singles", "site", "soccer",
    "social", "software", "solar", "solutions", "space", "store", "studio",
    "style", "supplies", "supply", "support", "surgery", "systems", "tax",
    "team", "tech", "technology", "tennis", "theater", "tienda", "tips",
    "tires", "today", "tools", "top", "tours", "town", "toys", "training",
    "university", "vacations", "ventures", "vet", "video", "villas",
    "vision", "watch", "website", "wiki", "wine", "works", "world", "wtf",
    "xyz", "zone",
    // ccTLDs.
    "ac", "ad", "ae", "af", "ag", "ai", "al", "am", "ao", "ar", "at", "au",
    "az", "ba", "bb", "bd", "be", "bf", "bg", "bh", "bi", "bj", "bm", "bn",
    "bo", "br", "bs", "bt", "bw", "by", "bz", "ca", "cc", "cd", "cf", "cg",
    "ch", "ci", "ck", "cl", "cm", "cn", "co", "cr", "cu", "cv", "cy", "cz",
    "de", "dj", "dk", "dm", "do", "dz", "ec", "ee", "eg", "es", "et", "eu",
    "fi", "fj", "fm", "fo", "fr", "ga", "gd", "ge", "gg", "gh", "gi", "gl",
    "gm", "gn", "gp", "gq", "gr", "gt", "gu", "gy", "hk", "hn", "hr", "ht",
    "hu", "id", "ie", "il", "im", "in", "iq", "ir", "is", "it", "je", "jm",
    "jo", "jp", "ke", "kg", "kh", "ki", "km", "kn", "kr", "kw", "ky", "kz",
    "la", "lb", "lc", "li", "lk", "lr", "ls", "lt", "lu", "lv", "ly", "ma",
    "mc", "md", "me", "mg", "mk", "ml", "mm", "mn", "mo", "mp", "mq", "mr",
    "ms", "mt", "mu", "mv", "mw", "mx", "my", "mz", "na", "nc", "ne", "nf",
    "ng", "ni", "nl", "no", "np", "nr", "nu", "nz", "om", "pa", "pe", "pf",
    "pg", "ph", "pk", "pl", "pm", "pn", "pr", "ps", "pt", "pw", "py", "qa",
    "re", "ro", "rs", "ru", "rw", "sa", "sb", "sc", "sd", "se", "sg", "sh",
    "si", "sk", "sl", "sm", "sn", "so", "sr", "st", "sv", "sy", "sz", "tc",
    "td", "tg", "th", "tj", "tk", "tl", "tm", "tn", "to", "tr", "tt", "tv",
    "tw", "tz", "ua", "ug", "uk", "us", "uy", "uz", "va", "vc", "ve", "vg",
    "vi", "vn", "vu", "wf", "ws", "ye", "za", "zm", "zw", "io",
];

#[rustfmt::skip]
static MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk", "sch.uk",
    "ltd.uk", "plc.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au", "id.au", "asn.au",
    "co.jp", "or.jp", "ne.jp", "ac.jp", "ad.jp", "ed.jp", "go.jp", "gr.jp",
    "lg.jp",
    "co.kr", "or.kr", "ne.kr", "re.kr", "go.kr", "ac.kr", "pe.kr",
    "com.br", "net.br", "org.br", "gov.br", "edu.br",
    "co.nz", "net.nz", "org.nz", "govt.nz", "ac.nz", "geek.nz", "school.nz",
    "co.za", "org.za", "net.za", "web.za", "gov.za", "ac.za",
    "com.cn", "net.cn", "org.cn", "gov.cn", "edu.cn", "ac.cn",
    "com.tw", "org.tw", "net.tw", "edu.tw", "gov.tw", "idv.tw",
    "com.hk", "org.hk", "net.hk", "edu.hk", "gov.hk", "idv.hk",
    "com.sg", "org.sg", "net.sg", "edu.sg", "gov.sg", "per.sg",
    "co.in", "net.in", "org.in", "firm.in", "gen.in", "ind.in", "ac.in",
    "edu.in", "gov.in", "res.in", "nic.in",
    "com.mx", "org.mx", "net.mx", "gob.mx", "edu.mx",
    "com.ar", "net.ar", "org.ar", "gob.ar", "edu.ar",
    "com.tr", "net.tr", "org.tr", "gov.tr", "edu.tr", "web.tr",
    "com.ua", "net.ua", "org.ua", "gov.ua", "edu.ua", "in.ua",
    "co.il", "org.il", "net.il", "ac.il", "gov.il", "muni.il",
    "com.my", "net.my", "org.my", "gov.my", "edu.my",
    "co.id", "com.id", "net.id", "or.id", "ac.id", "go.id", "web.id",
    "sch.id",
    "com.ph", "net.ph", "org.ph", "gov.ph", "edu.ph",
    "com.vn", "net.vn", "org.vn", "gov.vn", "edu.vn", "info.vn",
    "com.eg", "net.eg", "org.eg", "gov.eg", "edu.eg",
    "com.sa", "net.sa", "org.sa", "gov.sa", "edu.sa", "med.sa",
    "com.pk", "net.pk", "org.pk", "gov.pk", "edu.pk",
    "com.bd", "net.bd", "org.bd", "gov.bd", "edu.bd",
    "com.ng", "net.ng", "org.ng", "gov.ng", "edu.ng",
    "co.ke", "or.ke", "ne.ke", "go.ke", "ac.ke", "sc.ke",
    "co.th", "in.th", "or.th", "ac.th", "go.th", "net.th",
    "com.pl", "net.pl", "org.pl", "edu.pl", "gov.pl", "waw.pl",
    "com.pt", "org.pt", "edu.pt", "gov.pt",
    "com.gr", "net.gr", "org.gr", "edu.gr", "gov.gr",
    "com.co", "net.co", "org.co", "edu.co", "gov.co", "nom.co",
    "com.ve", "net.ve", "org.ve", "gob.ve",
    "com.pe", "net.pe", "org.pe", "gob.pe", "edu.pe", "nom.pe",
    "com.ec", "gob.ec", "med.ec",
    "com.uy", "net.uy", "org.uy", "edu.uy", "gub.uy",
    "com.py", "net.py", "org.py", "edu.py", "gov.py",
    "com.bo", "net.bo", "org.bo", "gob.bo", "edu.bo",
    "com.do", "net.do", "org.do", "gob.do", "edu.do",
    "com.gt", "net.gt", "org.gt", "gob.gt", "edu.gt",
    "com.sv", "org.sv", "gob.sv", "edu.sv",
    "co.cr", "or.cr", "go.cr", "ac.cr", "fi.cr", "ed.cr",
    "co.zw", "org.zw", "ac.zw", "gov.zw",
    "co.bw", "org.bw",
    "co.mz", "org.mz", "gov.mz",
    "co.ug", "or.ug", "ne.ug", "go.ug", "ac.ug", "sc.ug",
    "co.tz", "or.tz", "ne.tz", "go.tz", "ac.tz", "sc.tz",
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn localhost_is_valid() {
        assert_eq!(classify("localhost"), HostClass::Localhost);
        assert!(is_valid_cookie_scope("localhost"));
        assert_eq!(classify("LOCALHOST"), HostClass::Localhost);
    }

    #[test]
    fn well_formed_ips_are_valid() {
        assert_eq!(classify("127.0.0.1"), HostClass::IpAddress);
        assert_eq!(classify("10.0.0.255"), HostClass::IpAddress);
        assert_eq!(classify("::1"), HostClass::IpAddress);
        assert_eq!(classify("[2001:db8::1]"), HostClass::IpAddress);
        assert!(is_valid_cookie_scope("127.0.0.1"));
    }

    #[test]
    fn malformed_ips_are_invalid() {
        assert_eq!(classify("256.1.1.1"), HostClass::MalformedIp);
        assert_eq!(classify("1.2.3"), HostClass::MalformedIp);
        assert_eq!(classify("1.2.3.4.5"), HostClass::MalformedIp);
        assert_eq!(classify("[not:v6"), HostClass::MalformedIp);
        assert!(!is_valid_cookie_scope("256.1.1.1"));
    }

    #[test]
    fn private_single_labels_are_valid() {
        assert_eq!(classify("intranet"), HostClass::PrivateSingleLabel);
        assert_eq!(classify("server01"), HostClass::PrivateSingleLabel);
        assert!(is_valid_cookie_scope("server01"));
    }

    #[test]
    fn bare_public_suffixes_are_invalid() {
        for suffix in ["com", "org", "io", "uk", "test", "co.uk", "ac.jp"] {
            assert_eq!(classify(suffix), HostClass::PublicSuffix, "{suffix}");
            assert!(!is_valid_cookie_scope(suffix), "{suffix}");
        }
    }

    #[test]
    fn registrable_names_are_valid() {
        assert_eq!(classify("example.com"), HostClass::Registrable);
        assert_eq!(classify("example.co.uk"), HostClass::Registrable);
        assert_eq!(classify("deep.sub.example.co.uk"), HostClass::Registrable);
        // Unknown suffix, two labels: valid conservatively.
        assert_eq!(classify("foo.unknowntld"), HostClass::Registrable);
    }

    #[test]
    fn empty_labels_are_invalid() {
        assert!(!is_valid_cookie_scope("foo..bar"));
        assert!(!is_valid_cookie_scope(""));
    }

    #[test]
    fn trailing_dot_is_ignored() {
        assert_eq!(classify("example.com."), HostClass::Registrable);
        assert_eq!(classify("com."), HostClass::PublicSuffix);
    }

    #[test]
    fn is_public_suffix_matches_tables() {
        assert!(is_public_suffix("com"));
        assert!(is_public_suffix("co.uk"));
        assert!(is_public_suffix("test"));
        assert!(!is_public_suffix("example.com"));
        assert!(!is_public_suffix("sub.co.uk"));
    }
}
