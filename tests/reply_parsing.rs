use roomhue_core::palette::matcher::ObjectMatcher;
use roomhue_core::palette::parser::{ParseStrategy, SpecParser};
use roomhue_core::palette::registry::PaletteTables;
use roomhue_core::palette::resolver::DEFAULT_NAME_DISTANCE_THRESHOLD;
use roomhue_core::palette::room::{detect_room_type, RoomType};
use roomhue_core::palette::Rgb;

fn parser() -> SpecParser {
    SpecParser::new(PaletteTables::builtin())
}

#[test]
fn four_reply_shapes_agree_on_bed_color() {
    let parser = parser();
    let shapes = [
        (r#"{"bed":[255,255,255]}"#, ParseStrategy::StructuredData),
        ("bed: (255,255,255)", ParseStrategy::TupleScan),
        ("bed: [255,255,255]", ParseStrategy::TupleScan),
        ("bed is white", ParseStrategy::NaturalLanguage),
    ];

    for (reply, strategy) in shapes {
        let outcome = parser.parse(reply);
        assert_eq!(outcome.strategy, Some(strategy), "reply: {reply}");
        assert_eq!(outcome.len(), 1, "reply: {reply}");
        let rgb = outcome.assignments[0].rgb().expect("rgb should be resolved");
        assert!(
            rgb.distance(Rgb::new(255, 255, 255)) <= DEFAULT_NAME_DISTANCE_THRESHOLD,
            "reply {reply} resolved to {rgb}"
        );
    }
}

#[test]
fn typical_model_reply_is_parsed_in_order() {
    let reply = "Here is the palette:\n\
        1. bed: (250, 250, 250)\n\
        2. nightstand: (210, 180, 140)\n\
        3. sofa: (200, 200, 200)\n\
        4. bed: (0, 0, 0)\n\
        5. rug: (300, 10, 10)\n";
    let outcome = parser().parse(reply);

    assert_eq!(outcome.strategy, Some(ParseStrategy::TupleScan));
    let targets = outcome
        .assignments
        .iter()
        .map(|a| a.target())
        .collect::<Vec<_>>();
    assert_eq!(targets, vec!["bed", "nightstand", "sofa"]);
    assert_eq!(outcome.assignments[0].hex(), Some("#fafafa"));
    assert!(!outcome.assignments[0].color_name().is_empty());
}

#[test]
fn empty_and_malformed_replies_yield_empty_outcomes() {
    let parser = parser();
    for reply in ["", "   ", "{\"bed\": [1, 2", "no furniture words at all", "((((", "bed: (,,)"] {
        let outcome = parser.parse(reply);
        assert!(outcome.is_empty(), "reply {reply:?} produced {outcome:?}");
    }
}

#[test]
fn parsed_targets_match_scene_objects() {
    let tables = PaletteTables::builtin();
    let parser = SpecParser::new(tables.clone());
    let matcher = ObjectMatcher::new(tables.targets.clone());
    let outcome = parser.parse("bed: (255, 255, 255)\nnightstand: (210, 180, 140)");
    let scene = ["Bed_01", "Nightstand_02", "Wall_03"];

    let matched = outcome
        .assignments
        .iter()
        .map(|a| matcher.match_objects(a.target(), &scene))
        .collect::<Vec<_>>();
    assert_eq!(
        matched,
        vec![vec![String::from("Bed_01")], vec![String::from("Nightstand_02")]]
    );
}

#[test]
fn room_detection_prefers_common_rooms() {
    assert_eq!(
        detect_room_type("a Nordic bedroom next to the kitchen"),
        Some(RoomType::Bedroom)
    );
    assert_eq!(detect_room_type("生成一个北欧风的卧室"), Some(RoomType::Bedroom));
    assert_eq!(detect_room_type("a cozy space"), None);
}
