mod common;

use autoplan::requirement::{
    from_json, next_child_id, next_top_level_id, parse_requirement_category,
    parse_requirement_type, to_json, validate_hierarchy, validate_node, ImplementationHints,
    PropertyType, RequirementCategory, RequirementNode, RequirementType, TestableProperty,
};

use common::{make_child, make_clean_node};

// --- Enum parsing ---

#[test]
fn requirement_type_parse_accepts_aliases() {
    assert_eq!(
        parse_requirement_type("PARENT").unwrap(),
        RequirementType::Parent
    );
    assert_eq!(
        parse_requirement_type("sub-process").unwrap(),
        RequirementType::SubProcess
    );
    assert_eq!(
        parse_requirement_type("implementation").unwrap(),
        RequirementType::Implementation
    );
    assert!(parse_requirement_type("epic").is_err());
}

#[test]
fn requirement_category_covers_the_closed_set() {
    for name in [
        "functional",
        "non_functional",
        "security",
        "performance",
        "usability",
        "integration",
    ] {
        parse_requirement_category(name).unwrap();
    }
    assert!(parse_requirement_category("cosmetic").is_err());
}

// --- Node validation ---

#[test]
fn blank_description_is_rejected() {
    let node = RequirementNode::new("REQ_000", "   ", RequirementType::Implementation);
    let errors = validate_node(&node).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("description")));
}

#[test]
fn blank_criteria_are_rejected() {
    let mut node = make_clean_node("REQ_000");
    node.acceptance_criteria.push("".to_string());
    let errors = validate_node(&node).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("acceptance_criteria[1]")));
}

// --- Hierarchy validation ---

#[test]
fn valid_hierarchy_passes() {
    let mut root = make_clean_node("REQ_000");
    root.children.push(make_child("REQ_000", 1));
    root.children.push(make_child("REQ_000", 2));
    validate_hierarchy(&root).unwrap();
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut root = make_clean_node("REQ_000");
    let mut dup = make_clean_node("REQ_000");
    dup.parent_id = Some("REQ_000".to_string());
    root.children.push(dup);

    let errors = validate_hierarchy(&root).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("duplicate requirement id")));
}

#[test]
fn parent_id_must_match_containing_node() {
    let mut root = make_clean_node("REQ_000");
    let mut child = make_clean_node("REQ_000.1");
    child.parent_id = Some("REQ_999".to_string());
    root.children.push(child);

    let errors = validate_hierarchy(&root).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.contains("does not match containing node")));
}

#[test]
fn missing_parent_id_on_nested_node_is_rejected() {
    let mut root = make_clean_node("REQ_000");
    root.children.push(make_clean_node("REQ_000.1"));

    let errors = validate_hierarchy(&root).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("missing parent_id")));
}

// --- Id generation ---

#[test]
fn top_level_ids_start_at_req_000() {
    assert_eq!(next_top_level_id(&[]), "REQ_000");
}

#[test]
fn top_level_ids_are_zero_padded_max_plus_one() {
    let ids: Vec<String> = vec!["REQ_002", "REQ_010", "REQ_005"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(next_top_level_id(&ids), "REQ_011");
}

#[test]
fn child_ids_extend_past_the_highest_suffix() {
    let mut parent = make_clean_node("REQ_003");
    assert_eq!(next_child_id(&parent), "REQ_003.1");

    parent.children.push(make_child("REQ_003", 1));
    parent.children.push(make_child("REQ_003", 5));
    assert_eq!(next_child_id(&parent), "REQ_003.6");
}

#[test]
fn child_ids_ignore_other_parents_suffixes() {
    let mut parent = make_clean_node("REQ_001");
    let mut foreign = make_clean_node("REQ_002.7");
    foreign.parent_id = Some("REQ_001".to_string());
    parent.children.push(foreign);
    assert_eq!(next_child_id(&parent), "REQ_001.1");
}

// --- Serialization ---

#[test]
fn hierarchy_round_trips_losslessly() {
    let mut root = make_clean_node("REQ_000");
    root.requirement_type = RequirementType::Parent;
    root.category = Some(RequirementCategory::Functional);
    root.testable_properties.push(TestableProperty {
        criterion: "Same input yields the same output".to_string(),
        property_type: PropertyType::Idempotence,
    });
    root.related_concepts.insert("lookup".to_string());
    root.related_concepts.insert("records".to_string());
    root.function_id = Some("fn_lookup".to_string());
    root.implementation = Some(ImplementationHints {
        backend: vec!["record_service".to_string()],
        shared: vec!["RecordList".to_string()],
        ..Default::default()
    });
    root.children.push(make_child("REQ_000", 1));

    let json = to_json(&root).unwrap();
    let reparsed = from_json(&json).unwrap();
    assert_eq!(reparsed, root);
}

#[test]
fn empty_optionals_are_omitted_and_arrays_stay_arrays() {
    let node = make_clean_node("REQ_000");
    let json = to_json(&node).unwrap();

    assert!(!json.contains("parent_id"));
    assert!(!json.contains("category"));
    assert!(!json.contains("function_id"));
    // collections serialize as [], never null
    assert!(json.contains("\"children\": []"));
    assert!(!json.contains("null"));
}

#[test]
fn type_field_uses_the_wire_name() {
    let node = make_clean_node("REQ_000");
    let json = to_json(&node).unwrap();
    assert!(json.contains("\"type\": \"implementation\""));
}

#[test]
fn find_and_count_walk_the_tree() {
    let mut root = make_clean_node("REQ_000");
    root.children.push(make_child("REQ_000", 1));
    let mut second = make_child("REQ_000", 2);
    second.children.push({
        let mut grandchild = make_clean_node("REQ_000.2.1");
        grandchild.parent_id = Some("REQ_000.2".to_string());
        grandchild
    });
    root.children.push(second);

    assert_eq!(root.count(), 4);
    assert!(root.find("REQ_000.2.1").is_some());
    assert!(root.find("REQ_404").is_none());
}
