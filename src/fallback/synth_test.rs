use super::*;

fn field(field_type: &str) -> FieldSpec {
    FieldSpec::new(field_type, "")
}

#[test]
fn patient_id_at_index_three_is_pt1003_for_any_type() {
    for ty in ["string", "number", "uuid", "mystery"] {
        assert_eq!(synthesize_value("patient_id", &field(ty), 3), json!("PT1003"));
    }
}

#[test]
fn price_is_numeric_string_within_bounds() {
    for i in 0..200 {
        let value = synthesize_value("price", &field("number"), i);
        let text = value.as_str().expect("price renders as a string");
        let parsed: f64 = text.parse().expect("numeric");
        assert!((50.0..550.0).contains(&parsed), "{parsed} out of range");
    }
}

#[test]
fn name_rules_rotate_by_index() {
    let spec = field("string");
    assert_eq!(synthesize_value("full_name", &spec, 0), synthesize_value("full_name", &spec, NAMES.len()));
    assert_ne!(synthesize_value("full_name", &spec, 0), synthesize_value("full_name", &spec, 1));
    assert_eq!(synthesize_value("diagnosis", &spec, 2), json!(DIAGNOSES[2]));
    assert_eq!(synthesize_value("category", &spec, 7), json!(CATEGORIES[7 % CATEGORIES.len()]));
}

#[test]
fn rule_order_is_fixed() {
    // "patient" precedes "name" in the rule list.
    assert_eq!(synthesize_value("patient_name", &field("string"), 0), json!("PT1000"));
    assert_eq!(synthesize_value("account_id", &field("string"), 5), json!("ACC100005"));
}

#[test]
fn field_name_wins_over_description() {
    let spec = FieldSpec::new("number", "Patient age");
    let value = synthesize_value("age", &spec, 0);
    assert_eq!(value, json!(18));
}

#[test]
fn description_rules_apply_when_name_is_opaque() {
    let spec = FieldSpec::new("string", "Contact email");
    assert_eq!(synthesize_value("c1", &spec, 0), json!("user1@example.com"));
}

#[test]
fn description_rules_match_whole_words_only() {
    let spec = FieldSpec::new("number", "Average order value").with_range(0, 10);
    assert_eq!(synthesize_value("metric_x", &spec, 0), json!(0));

    let spec = FieldSpec::new("string", "Shipping addresses on file");
    assert_eq!(synthesize_value("c2", &spec, 0), synthesize_value("address", &field("string"), 0));
}

#[test]
fn examples_take_priority_and_cycle() {
    let mut spec = field("string");
    spec.examples = vec![json!("red"), json!("green")];
    assert_eq!(synthesize_value("patient_color", &spec, 0), json!("red"));
    assert_eq!(synthesize_value("patient_color", &spec, 3), json!("green"));
}

#[test]
fn amount_is_bounded_number() {
    for i in 0..50 {
        let value = synthesize_value("balance", &field("number"), i).as_f64().unwrap();
        assert!((10.0..5000.0).contains(&value));
    }
}

#[test]
fn type_dispatch_covers_declared_types() {
    assert_eq!(synthesize_value("flag", &field("boolean"), 0), json!(true));
    assert_eq!(synthesize_value("flag", &field("boolean"), 1), json!(false));
    assert_eq!(synthesize_value("c", &field("phone"), 2), json!("+1-555-1002"));
    assert_eq!(synthesize_value("c", &field("email"), 0), json!("user1@example.com"));

    let id = synthesize_value("ref", &field("uuid"), 0);
    assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());

    let day = synthesize_value("when", &field("date"), 0);
    assert_eq!(day.as_str().unwrap().len(), 10);

    let stamp = synthesize_value("when", &field("datetime"), 0);
    assert!(OffsetDateTime::parse(stamp.as_str().unwrap(), &Rfc3339).is_ok());
}

#[test]
fn numbers_step_through_constraints() {
    let spec = FieldSpec::new("integer", "").with_range(0, 100);
    assert_eq!(synthesize_value("score", &spec, 0), json!(0));
    assert_eq!(synthesize_value("score", &spec, 3), json!(30));
    assert_eq!(synthesize_value("score", &spec, 13), json!(30));
}

#[test]
fn strings_use_description_slug() {
    let spec = FieldSpec::new("string", "Transaction type");
    assert_eq!(synthesize_value("transaction_type", &spec, 0), json!("sample_transaction_type_1"));
}

#[test]
fn unknown_type_gets_labeled_placeholder() {
    assert_eq!(synthesize_value("blob", &field("binary"), 1), json!("blob_binary_2"));
}

#[test]
fn rows_follow_schema_order() {
    let mut schema = Schema::new();
    schema.insert("patient_id", field("string"));
    schema.insert("diagnosis", field("string"));
    let dataset = synthesize_rows(&schema, 4);
    assert_eq!(dataset.columns, vec!["patient_id", "diagnosis"]);
    assert_eq!(dataset.len(), 4);
    assert_eq!(dataset.rows[3]["patient_id"], json!("PT1003"));
}
