use crate::extract::normalize_url;

const ORIGIN: &str = "https://www.alibaba.com";

#[test]
fn test_protocol_relative() {
    assert_eq!(
        normalize_url("//supplier.example.com/profile", ORIGIN),
        "https://supplier.example.com/profile"
    );
}

#[test]
fn test_root_relative() {
    assert_eq!(
        normalize_url("/company/123.html", ORIGIN),
        "https://www.alibaba.com/company/123.html"
    );
}

#[test]
fn test_scheme_less_absolute() {
    assert_eq!(
        normalize_url("supplier.example.com/profile", ORIGIN),
        "https://supplier.example.com/profile"
    );
}

#[test]
fn test_absolute_passthrough() {
    assert_eq!(
        normalize_url("http://supplier.example.com/a", ORIGIN),
        "http://supplier.example.com/a"
    );
    assert_eq!(
        normalize_url("https://supplier.example.com/a", ORIGIN),
        "https://supplier.example.com/a"
    );
}

#[test]
fn test_empty_and_whitespace() {
    assert_eq!(normalize_url("", ORIGIN), "");
    assert_eq!(normalize_url("   ", ORIGIN), "");
}

#[test]
fn test_origin_trailing_slash() {
    assert_eq!(
        normalize_url("/x", "https://www.alibaba.com/"),
        "https://www.alibaba.com/x"
    );
}

#[test]
fn test_idempotent() {
    let inputs = [
        "//supplier.example.com/profile",
        "/company/123.html",
        "supplier.example.com/profile",
        "https://supplier.example.com/a",
        "",
    ];
    for input in inputs {
        let once = normalize_url(input, ORIGIN);
        let twice = normalize_url(&once, ORIGIN);
        assert_eq!(once, twice, "normalization must be idempotent for {input:?}");
    }
}
