use service_router::generators::{StaticGenerator, StatusGenerator};
use service_router::status_rule::{aggregate, StatusFold};
use service_router::{Aggregation, GeneratorBinding, GeneratorKind, Selector, StatusRule};

fn fold(mode: Aggregation, statuses: &[u16]) -> u16 {
    let mut fold = StatusFold::new(mode);
    for status in statuses {
        fold.observe(*status, None);
    }
    fold.finish().0
}

#[test]
fn test_modes_over_mixed_statuses() {
    let statuses = [200, 404, 200];
    assert_eq!(fold(Aggregation::Highest, &statuses), 404);
    assert_eq!(fold(Aggregation::Lowest, &statuses), 200);
    assert_eq!(fold(Aggregation::First, &statuses), 200);

    let statuses = [404, 200, 500];
    assert_eq!(fold(Aggregation::Highest, &statuses), 500);
    assert_eq!(fold(Aggregation::Lowest, &statuses), 200);
    assert_eq!(fold(Aggregation::First, &statuses), 404);
}

#[test]
fn test_aggregate_step() {
    assert_eq!(aggregate(None, 301, Aggregation::First), (301, true));
    assert_eq!(aggregate(Some(200), 500, Aggregation::Highest), (500, true));
    assert_eq!(aggregate(Some(200), 500, Aggregation::Lowest), (200, false));
    assert_eq!(aggregate(Some(200), 200, Aggregation::Highest), (200, false));
}

#[test]
fn test_location_dropped_when_redirect_loses() {
    let mut fold = StatusFold::new(Aggregation::Highest);
    fold.observe(302, Some("/elsewhere"));
    fold.observe(404, None);
    assert_eq!(fold.finish(), (404, None));

    let mut fold = StatusFold::new(Aggregation::Lowest);
    fold.observe(404, None);
    fold.observe(301, Some("/moved"));
    assert_eq!(fold.finish(), (301, Some("/moved".to_string())));
}

#[test]
fn test_default_rule_considers_everything() {
    let rule = StatusRule::default();
    assert_eq!(rule.aggregation, Aggregation::Highest);
    let binding = GeneratorBinding::new("static", GeneratorKind::cacheable(StaticGenerator));
    assert!(rule.applies_to(&binding));
}

#[test]
fn test_selection_by_name_and_target() {
    let named =
        GeneratorBinding::new("status", GeneratorKind::plain(StatusGenerator)).named("main");
    let targeted =
        GeneratorBinding::new("static", GeneratorKind::cacheable(StaticGenerator)).targeted("body");
    let plain = GeneratorBinding::new("static", GeneratorKind::cacheable(StaticGenerator));

    let by_name = StatusRule::new(Selector::Name, Aggregation::Highest).select("main");
    assert!(by_name.applies_to(&named));
    assert!(!by_name.applies_to(&targeted));

    // Unnamed bindings are selected by their type name
    let by_type = StatusRule::all(Aggregation::First).select("static");
    assert!(by_type.applies_to(&plain));
    assert!(!by_type.applies_to(&named));

    let by_target = StatusRule::new(Selector::Target, Aggregation::Highest).select("body");
    assert!(by_target.applies_to(&targeted));
    assert!(!by_target.applies_to(&plain));
}

#[test]
fn test_parse_names() {
    assert_eq!("HIGHEST".parse::<Aggregation>().unwrap(), Aggregation::Highest);
    assert_eq!("target".parse::<Selector>().unwrap(), Selector::Target);
    assert!("median".parse::<Aggregation>().is_err());
    assert_eq!(Aggregation::Lowest.to_string(), "lowest");
}
