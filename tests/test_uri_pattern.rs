use service_router::uri_pattern::{find_best_match, UriPattern, Variables};

fn vars(pairs: &[(&str, &str)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_parse_errors() {
    for bad in [
        "news/{id}",
        "/news/{id",
        "/news/id}",
        "/news/{}",
        "/news/{a}{b}",
        "/news/{id}/{id}",
        "/files/{+path}/tail",
        "/files/x{+path}",
        "/news/{bad name}",
    ] {
        let err = UriPattern::parse(bad);
        assert!(err.is_err(), "pattern {:?} should be rejected", bad);
        assert!(err.unwrap_err().is_config_error());
    }
}

#[test]
fn test_prefix_and_suffix() {
    let p = UriPattern::parse("/items/item-{id}.xml").unwrap();
    assert_eq!(p.resolve("/items/item-12.xml"), Some(vars(&[("id", "12")])));
    assert!(!p.matches("/items/item-.xml"));
    assert!(!p.matches("/items/12.xml"));
    assert_eq!(p.expand(&vars(&[("id", "7")])), "/items/item-7.xml");
}

#[test]
fn test_percent_decoding() {
    let p = UriPattern::parse("/search/{term}").unwrap();
    assert_eq!(
        p.resolve("/search/caf%C3%A9%20noir"),
        Some(vars(&[("term", "café noir")]))
    );
    assert_eq!(
        p.expand(&vars(&[("term", "a/b c")])),
        "/search/a%2Fb%20c"
    );
}

#[test]
fn test_greedy_keeps_slashes() {
    let p = UriPattern::parse("/files/{+path}").unwrap();
    assert_eq!(
        p.resolve("/files/a/b/c.txt"),
        Some(vars(&[("path", "a/b/c.txt")]))
    );
    assert!(!p.matches("/files/"));
    assert_eq!(p.expand(&vars(&[("path", "a/b c")])), "/files/a/b%20c");
}

#[test]
fn test_greedy_default() {
    let p = UriPattern::parse("/docs/{+page=index}").unwrap();
    assert_eq!(p.resolve("/docs/"), Some(vars(&[("page", "index")])));
    assert_eq!(p.resolve("/docs/a/b"), Some(vars(&[("page", "a/b")])));
}

#[test]
fn test_trailing_slash_is_significant() {
    let p = UriPattern::parse("/news/{id}").unwrap();
    assert!(p.matches("/news/1"));
    assert!(!p.matches("/news/1/"));

    let q = UriPattern::parse("/news/{id}/").unwrap();
    assert!(q.matches("/news/1/"));
    assert!(!q.matches("/news/1"));
}

#[test]
fn test_expand_uses_defaults() {
    let p = UriPattern::parse("/news/{section}/{page=1}").unwrap();
    assert_eq!(p.expand(&vars(&[("section", "sport")])), "/news/sport/1");
    assert_eq!(p.expand(&Variables::new()), "/news//1");
}

#[test]
fn test_variable_names_and_counts() {
    let p = UriPattern::parse("/a/{x}/b/{y=2}/{+rest}").unwrap();
    assert_eq!(p.variable_names(), vec!["x", "y", "rest"]);
    assert_eq!(p.variable_count(), 3);
    assert!(!p.is_literal());
    assert_eq!(p.to_string(), "/a/{x}/b/{y=2}/{+rest}");
}

#[test]
fn test_equality_follows_source() {
    let a: UriPattern = "/news/{id}".parse().unwrap();
    let b = UriPattern::parse("/news/{id}").unwrap();
    let c = UriPattern::parse("/news/{key}").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_best_match_prefers_fewer_variables() {
    let patterns = [
        UriPattern::parse("/news/{section}/{id}").unwrap(),
        UriPattern::parse("/news/{section}/latest").unwrap(),
        UriPattern::parse("/news/sport/latest").unwrap(),
    ];

    let (index, bound) = find_best_match(&patterns, "/news/sport/latest").unwrap();
    assert_eq!(index, 2);
    assert!(bound.is_empty());

    let (index, bound) = find_best_match(&patterns, "/news/world/latest").unwrap();
    assert_eq!(index, 1);
    assert_eq!(bound, vars(&[("section", "world")]));

    let (index, _) = find_best_match(&patterns, "/news/world/42").unwrap();
    assert_eq!(index, 0);

    assert!(find_best_match(&patterns, "/weather").is_none());
}

#[test]
fn test_best_match_tie_keeps_declaration_order() {
    let patterns = [
        UriPattern::parse("/p/{a}").unwrap(),
        UriPattern::parse("/p/{b}").unwrap(),
    ];
    let (index, bound) = find_best_match(&patterns, "/p/1").unwrap();
    assert_eq!(index, 0);
    assert_eq!(bound, vars(&[("a", "1")]));
}
