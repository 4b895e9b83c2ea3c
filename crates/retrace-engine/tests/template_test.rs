use retrace_engine::protocol::Action;
use retrace_engine::template::{Variables, placeholders, render, render_action, variables_from_row};
use serde_json::json;

fn vars(pairs: &[(&str, &str)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_render_substitutes_known_names() {
    let v = vars(&[("user", "alice"), ("qty", "3")]);
    assert_eq!(render("{{user}} x{{ qty }}", &v), "alice x3");
    assert_eq!(render("{{ other }}", &v), "{{ other }}");
    assert_eq!(render("no placeholders", &v), "no placeholders");
    assert_eq!(render("{{user}}", &Variables::new()), "{{user}}");
}

#[test]
fn test_placeholders_in_order() {
    assert_eq!(
        placeholders("{{a}}-{{ b.c }}-{{a}}"),
        vec!["a".to_string(), "b.c".to_string(), "a".to_string()]
    );
}

#[test]
fn test_render_action_leaves_timestamp() {
    let v = vars(&[("sku", "42")]);
    let action = Action::click("[data-sku=\"{{sku}}\"]", 9);
    let rendered = render_action(&action, &v);
    assert_eq!(rendered.selector(), Some("[data-sku=\"42\"]"));
    assert_eq!(rendered.timestamp(), 9);
}

#[test]
fn test_variables_from_row() {
    let row = json!({"name": "Bob", "age": 30, "vip": true, "note": null, "tags": ["x"]});
    let v = variables_from_row(row.as_object().unwrap());
    assert_eq!(v.get("name").map(String::as_str), Some("Bob"));
    assert_eq!(v.get("age").map(String::as_str), Some("30"));
    assert_eq!(v.get("vip").map(String::as_str), Some("true"));
    assert_eq!(v.get("note").map(String::as_str), Some(""));
    assert!(!v.contains_key("tags"));
}
