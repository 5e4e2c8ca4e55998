// Properties of the aggregate ETag: it is a pure function of the seed, the
// ordered generator tags and the renderer tag.

use proptest::prelude::*;
use service_router::etag::{compose_etag, if_none_match, quote, EtagSeed};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_compose_is_pure(
        seed in any::<u64>(),
        tags in prop::collection::vec("[ -~]{0,12}", 0..6),
        renderer in prop::option::of("[a-z0-9]{1,8}"),
    ) {
        let a = compose_etag(seed, &tags, renderer.as_deref());
        let b = compose_etag(seed, &tags, renderer.as_deref());
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 16);
        prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prop_swapping_distinct_tags_changes_etag(
        seed in any::<u64>(),
        first in "[a-z]{1,8}",
        second in "[A-Z]{1,8}",
    ) {
        let forward = compose_etag(seed, &[first.clone(), second.clone()], Some("xml"));
        let backward = compose_etag(seed, &[second, first], Some("xml"));
        prop_assert_ne!(forward, backward);
    }

    #[test]
    fn prop_seed_matters(
        seed in any::<u64>(),
        tags in prop::collection::vec("[a-z]{1,8}", 1..4),
    ) {
        let other = seed.wrapping_add(1);
        prop_assert_ne!(
            compose_etag(seed, &tags, None),
            compose_etag(other, &tags, None)
        );
    }

    #[test]
    fn prop_own_tag_matches_if_none_match(
        tags in prop::collection::vec("[a-z]{1,8}", 0..4),
        other in "[0-9a-f]{16}",
    ) {
        let etag = compose_etag(7, &tags, Some("xml"));
        prop_assert!(if_none_match(&quote(&etag), &etag));
        let weak = format!("W/{}", quote(&etag));
        prop_assert!(if_none_match(&weak, &etag));
        let list = format!("{}, {}", quote(&other), quote(&etag));
        prop_assert!(if_none_match(&list, &etag));
        if other != etag {
            prop_assert!(!if_none_match(&quote(&other), &etag));
        }
    }
}

#[test]
fn test_seed_reset_always_changes() {
    let seed = EtagSeed::new(5);
    let mut previous = seed.get();
    for _ in 0..100 {
        let next = seed.reset();
        assert_ne!(next, previous);
        assert_eq!(seed.get(), next);
        previous = next;
    }
}
