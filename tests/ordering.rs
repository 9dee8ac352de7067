use tabflow::prelude::*;

fn number_rows(values: &[f64]) -> Vec<Row> {
    values
        .iter()
        .map(|v| {
            let mut r = Row::new();
            r.insert("x".to_string(), Value::Number(*v));
            r
        })
        .collect()
}

fn numbers(rows: &[Row]) -> Vec<f64> {
    rows.iter()
        .map(|r| match r["x"] {
            Value::Number(n) => n,
            _ => panic!("expected number"),
        })
        .collect()
}

#[test]
fn numeric_sort_handles_sign_zero_and_magnitude() {
    let input = number_rows(&[0.1, -1_000_000.0, 1_000_000.0, 0.0, -0.1]);
    let (results, _, _) = Flow::new()
        .step(from_rows("r", input))
        .step(sort_rows("{x}"))
        .results()
        .unwrap();
    assert_eq!(numbers(&results[0]), vec![-1_000_000.0, -0.1, 0.0, 0.1, 1_000_000.0]);
}

#[test]
fn sorting_twice_is_idempotent_and_reverse_mirrors() {
    let mk = |a: i64, b: &str| {
        let mut r = Row::new();
        r.insert("a".to_string(), Value::Integer(a));
        r.insert("b".to_string(), Value::String(b.to_string()));
        r
    };
    let input = vec![mk(2, "x"), mk(1, "y"), mk(2, "w"), mk(1, "y")];

    let (once, _, _) = Flow::new()
        .step(from_rows("r", input.clone()))
        .step(sort_rows("{b}{a}"))
        .results()
        .unwrap();
    let (twice, _, _) = Flow::new()
        .step(from_rows("r", input.clone()))
        .step(sort_rows("{b}{a}"))
        .step(sort_rows("{b}{a}"))
        .results()
        .unwrap();
    assert_eq!(once, twice);

    let (reversed, _, _) = Flow::new()
        .step(from_rows("r", input))
        .step(sort_rows("{b}{a}").reverse())
        .results()
        .unwrap();
    let mut mirror = once[0].clone();
    mirror.reverse();
    assert_eq!(reversed[0], mirror);
}

#[test]
fn deduplicate_keeps_one_row_per_compound_key() {
    let mk = |a: i64, b: i64, tag: &str| {
        let mut r = Row::new();
        r.insert("a".to_string(), Value::Integer(a));
        r.insert("b".to_string(), Value::Integer(b));
        r.insert("tag".to_string(), Value::String(tag.to_string()));
        r
    };
    let input = vec![
        mk(1, 1, "first"),
        mk(1, 2, "only"),
        mk(1, 1, "shadowed"),
        mk(2, 1, "solo"),
    ];

    let (results, _, _) = Flow::new()
        .step(from_rows("r", input))
        .step(set_primary_key(["a", "b"]))
        .step(deduplicate())
        .results()
        .unwrap();

    let rows = &results[0];
    assert_eq!(rows.len(), 3);
    let kept: Vec<&Value> = rows.iter().map(|r| &r["tag"]).collect();
    assert!(kept.contains(&&Value::String("first".into())));
    assert!(!kept.contains(&&Value::String("shadowed".into())));
}
