//! End-to-end scenarios: full pipeline from query text to rows against an
//! in-memory store, in both row and batch pull modes.

use keyql_core::{ExecuteCtx, MemStore, Optimizer, Storage, Value};

fn run_ctx(store: &MemStore, query: &str, ctx: &mut ExecuteCtx) -> Vec<Vec<Value>> {
    let opt = Optimizer::new(query);
    let mut plan = opt.build_plan(store).expect("plan");
    let mut rows = Vec::new();
    while let Some(row) = plan.next(ctx).expect("next") {
        rows.push(row);
    }
    rows
}

fn run(store: &MemStore, query: &str) -> Vec<Vec<Value>> {
    let mut ctx = ExecuteCtx::new();
    run_ctx(store, query, &mut ctx)
}

fn run_batch(store: &MemStore, query: &str) -> Vec<Vec<Value>> {
    let opt = Optimizer::new(query);
    let mut plan = opt.build_plan(store).expect("plan");
    let mut ctx = ExecuteCtx::new();
    let mut rows = Vec::new();
    loop {
        let chunk = plan.batch(&mut ctx).expect("batch");
        if chunk.is_empty() {
            break;
        }
        rows.extend(chunk);
    }
    rows
}

fn text(v: &Value) -> String {
    v.display_string()
}

fn int(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Float(f) => *f as i64,
        other => panic!("expected number, got {other:?}"),
    }
}

fn numbered_store() -> MemStore {
    // k01..k100 -> "1".."100"
    MemStore::from_pairs((1..=100).map(|i| {
        let key = if i < 10 {
            format!("k0{i}")
        } else {
            format!("k{i}")
        };
        (key.into_bytes(), i.to_string().into_bytes())
    }))
}

#[test]
fn test_point_get_with_value_filter() {
    let store = MemStore::from_pairs([("test", "x"), ("foo", "y")]);
    let rows = run(&store, "where key = 'test' & value = 'x'");
    assert_eq!(rows.len(), 1);
    assert_eq!(text(&rows[0][0]), "test");
    assert_eq!(text(&rows[0][1]), "x");
}

#[test]
fn test_prefix_match_on_key_and_value() {
    let store = MemStore::from_pairs([
        ("test1", "z1"),
        ("test2", "z2"),
        ("test3", "z3"),
        ("test4", "x1"),
    ]);
    let rows = run(&store, "where key ^= 'test' & value ^= 'z'");
    let keys: Vec<String> = rows.iter().map(|r| text(&r[0])).collect();
    assert_eq!(keys, ["test1", "test2", "test3"]);
}

#[test]
fn test_between_with_computed_order() {
    let store = numbered_store();
    let rows = run(
        &store,
        "select key, int(value) * 2 as d where key between 'k01' and 'k05' order by d desc",
    );
    assert_eq!(rows.len(), 5);
    let ds: Vec<i64> = rows.iter().map(|r| int(&r[1])).collect();
    assert_eq!(ds, [10, 8, 6, 4, 2]);
}

#[test]
fn test_alias_reuse_hits_field_cache() {
    let store = MemStore::from_pairs((1..=100).map(|i| {
        (
            format!("k{i}").into_bytes(),
            format!("k{i}_{i}").into_bytes(),
        )
    }));
    let query = "select key, value, int(split(value, '_')[1]) as sv \
                 where key ^= 'k' & sv > 10 & sv < 50";
    let mut ctx = ExecuteCtx::new();
    let rows = run_ctx(&store, query, &mut ctx);
    assert_eq!(rows.len(), 39);
    let mut svs: Vec<i64> = rows.iter().map(|r| int(&r[2])).collect();
    svs.sort();
    assert_eq!(svs, (11..=49).collect::<Vec<i64>>());
    assert!(ctx.hit > 0, "alias reuse should hit the field cache");
}

#[test]
fn test_field_cache_disabled_is_equivalent() {
    let store = MemStore::from_pairs((1..=100).map(|i| {
        (
            format!("k{i}").into_bytes(),
            format!("k{i}_{i}").into_bytes(),
        )
    }));
    let query = "select key, int(split(value, '_')[1]) as sv where key ^= 'k' & sv > 10 & sv < 50";
    let mut cached = ExecuteCtx::new();
    cached.set_cache_enabled(true);
    let with_cache = run_ctx(&store, query, &mut cached);

    let mut uncached = ExecuteCtx::new();
    uncached.set_cache_enabled(false);
    let without_cache = run_ctx(&store, query, &mut uncached);

    assert_eq!(with_cache, without_cache);
    assert!(cached.hit > 0);
    assert_eq!(uncached.hit, 0);
}

#[test]
fn test_delete_by_keys_and_rewrite() {
    let store = MemStore::from_pairs([("a", "1"), ("a1", "2"), ("b", "3")]);
    let plan_lines = Optimizer::new("delete where key in ('a', 'a1')")
        .build_plan(&store)
        .unwrap()
        .explain();
    assert!(
        plan_lines[0].starts_with("RemovePlan"),
        "delete over point gets should skip the reads: {plan_lines:?}"
    );

    let rows = run(&store, "delete where key in ('a', 'a1')");
    assert_eq!(int(&rows[0][0]), 2);
    let rest = run(&store, "select *");
    assert_eq!(rest.len(), 1);
    assert_eq!(text(&rest[0][0]), "b");
}

#[test]
fn test_put_then_get() {
    let store = MemStore::new();
    let rows = run(&store, "put ('k1', 'v1'), ('k2', upper('v2'))");
    assert_eq!(int(&rows[0][0]), 2);
    assert_eq!(store.get(b"k2").unwrap(), Some(b"V2".to_vec()));
    assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));

    // single pair goes through the point-write path
    let rows = run(&store, "put ('k3', 'v3')");
    assert_eq!(int(&rows[0][0]), 1);
    assert_eq!(store.len(), 3);
}

#[test]
fn test_remove_statement() {
    let store = MemStore::from_pairs([("x", "1"), ("y", "2"), ("z", "3")]);
    let rows = run(&store, "remove 'x', 'z'");
    assert_eq!(int(&rows[0][0]), 2);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_multi_get_emits_sorted_keys() {
    let store = MemStore::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]);
    let rows = run(&store, "select * where key in ('b', 'a', 'c')");
    let keys: Vec<String> = rows.iter().map(|r| text(&r[0])).collect();
    assert_eq!(keys, ["a", "b", "c"]);
}

#[test]
fn test_order_by_key_asc_matches_unordered() {
    let store = numbered_store();
    let plain = run(&store, "select * where key ^= 'k2'");
    let ordered = run(&store, "select * where key ^= 'k2' order by key asc");
    assert_eq!(plain, ordered);
}

#[test]
fn test_scan_shapes_return_exact_result_sets() {
    let store = numbered_store();
    let all = run(&store, "select *");
    assert_eq!(all.len(), 100);
    // Each query's result must equal brute-force filtering, whatever scan
    // shape the optimizer picked.
    let cases: Vec<(&str, Box<dyn Fn(&str, &str) -> bool>)> = vec![
        ("where key = 'k42'", Box::new(|k, _| k == "k42")),
        ("where key ^= 'k1'", Box::new(|k, _| k.starts_with("k1"))),
        (
            "where key between 'k10' and 'k20'",
            Box::new(|k, _| k >= "k10" && k <= "k20"),
        ),
        (
            "where key in ('k05', 'k50', 'nope')",
            Box::new(|k, _| k == "k05" || k == "k50"),
        ),
        (
            "where key > 'k95'",
            Box::new(|k, _| k > "k95"),
        ),
        (
            "where key < 'k05'",
            Box::new(|k, _| k < "k05"),
        ),
        (
            "where key ^= 'k1' & int(value) > 12",
            Box::new(|k, v| k.starts_with("k1") && v.parse::<i64>().unwrap() > 12),
        ),
        (
            "where key = 'k01' | key between 'k97' and 'k99'",
            Box::new(|k, _| k == "k01" || (k >= "k97" && k <= "k99")),
        ),
        (
            "where key ^= 'k0' | key ^= 'k1'",
            Box::new(|k, _| k.starts_with("k0") || k.starts_with("k1")),
        ),
        ("where value = '13'", Box::new(|_, v| v == "13")),
    ];
    for (query, pred) in cases {
        let got: Vec<String> = run(&store, query).iter().map(|r| text(&r[0])).collect();
        let mut want: Vec<String> = all
            .iter()
            .map(|r| (text(&r[0]), text(&r[1])))
            .filter(|(k, v)| pred(k, v))
            .map(|(k, _)| k)
            .collect();
        want.sort();
        let mut got_sorted = got.clone();
        got_sorted.sort();
        assert_eq!(got_sorted, want, "query {query}");
    }
}

#[test]
fn test_batch_and_row_modes_agree() {
    let store = numbered_store();
    for query in [
        "select *",
        "where key ^= 'k1'",
        "select key, int(value) * 2 as d where key between 'k01' and 'k20' order by d desc",
        "select key, value where key ^= 'k3' limit 3",
        "select key, value where key ^= 'k3' limit 2, 4",
        "select count(1) as c, sum(int(value)) as s where key ^= 'k1'",
    ] {
        assert_eq!(run(&store, query), run_batch(&store, query), "query {query}");
    }
}

#[test]
fn test_group_by_aggregates() {
    let store = MemStore::from_pairs([
        ("u1", "a_10"),
        ("u2", "b_20"),
        ("u3", "a_30"),
        ("u4", "b_40"),
    ]);
    let rows = run(
        &store,
        "select split(value, '_')[0] as g, count(1) as c, sum(int(split(value, '_')[1])) as s \
         where key ^= 'u' group by g",
    );
    assert_eq!(rows.len(), 2);
    // groups come out in first-insertion order
    assert_eq!(text(&rows[0][0]), "a");
    assert_eq!(int(&rows[0][1]), 2);
    assert_eq!(int(&rows[0][2]), 40);
    assert_eq!(text(&rows[1][0]), "b");
    assert_eq!(int(&rows[1][1]), 2);
    assert_eq!(int(&rows[1][2]), 60);
}

#[test]
fn test_aggregate_arithmetic_over_result() {
    let store = MemStore::from_pairs([("n1", "1"), ("n2", "2"), ("n3", "3")]);
    let rows = run(&store, "select sum(int(value)) * 2 as d where key ^= 'n'");
    assert_eq!(rows.len(), 1);
    assert_eq!(int(&rows[0][0]), 12);
}

#[test]
fn test_aggregate_partition_merge_property() {
    let pairs: Vec<(String, String)> = (1..=60)
        .map(|i| (format!("p{i:02}"), i.to_string()))
        .collect();
    let full = MemStore::from_pairs(pairs.clone());
    let first = MemStore::from_pairs(pairs[..30].to_vec());
    let second = MemStore::from_pairs(pairs[30..].to_vec());

    let q = "select count(1) as c, sum(int(value)) as s, min(int(value)) as lo, \
             max(int(value)) as hi where key ^= 'p'";
    let whole = run(&full, q);
    let a = run(&first, q);
    let b = run(&second, q);

    assert_eq!(int(&whole[0][0]), int(&a[0][0]) + int(&b[0][0]));
    assert_eq!(int(&whole[0][1]), int(&a[0][1]) + int(&b[0][1]));
    assert_eq!(int(&whole[0][2]), int(&a[0][2]).min(int(&b[0][2])));
    assert_eq!(int(&whole[0][3]), int(&a[0][3]).max(int(&b[0][3])));

    // AVG via SUM/COUNT composition
    let avg = run(&full, "select avg(int(value)) as a where key ^= 'p'");
    let composed = int(&whole[0][1]) as f64 / int(&whole[0][0]) as f64;
    match &avg[0][0] {
        Value::Float(f) => assert!((f - composed).abs() < 1e-9),
        other => panic!("avg should be float, got {other:?}"),
    }
}

#[test]
fn test_quantile_close_to_exact() {
    let store = MemStore::from_pairs((1..=1000).map(|i| {
        (format!("n{i:04}").into_bytes(), i.to_string().into_bytes())
    }));
    let rows = run(&store, "select quantile(int(value), 0.5) as q where key ^= 'n'");
    let q = match &rows[0][0] {
        Value::Float(f) => *f,
        other => panic!("quantile should be float, got {other:?}"),
    };
    assert!((q - 500.0).abs() <= 2.0, "median was {q}");
}

#[test]
fn test_group_concat_and_json_arrayagg() {
    let store = MemStore::from_pairs([("u1", "a"), ("u2", "b"), ("u3", "c")]);
    let rows = run(
        &store,
        "select group_concat(value, ',') as gc, json_arrayagg(value) as ja where key ^= 'u'",
    );
    assert_eq!(text(&rows[0][0]), "a,b,c");
    assert_eq!(text(&rows[0][1]), r#"["a","b","c"]"#);
}

#[test]
fn test_limit_with_start_offset() {
    let store = numbered_store();
    let rows = run(&store, "select key where key ^= 'k0' limit 2, 3");
    let keys: Vec<String> = rows.iter().map(|r| text(&r[0])).collect();
    assert_eq!(keys, ["k03", "k04", "k05"]);
}

#[test]
fn test_delete_with_limit_scans() {
    let store = MemStore::from_pairs([("d1", "1"), ("d2", "2"), ("d3", "3")]);
    let rows = run(&store, "delete where key ^= 'd' limit 2");
    assert_eq!(int(&rows[0][0]), 2);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_trailing_semicolons() {
    let store = MemStore::from_pairs([("s1", "1")]);
    assert_eq!(run(&store, "where key = 's1';;").len(), 1);
}

#[test]
fn test_syntax_error_reports_position_and_caret() {
    let store = MemStore::new();
    let query = "where key == 'oops'";
    let err = match Optimizer::new(query).build_plan(&store) {
        Err(e) => e,
        Ok(_) => panic!("expected build_plan to return an error"),
    };
    assert!(err.is_syntax());
    let bound = err.with_query(query);
    let rendered = bound.to_string();
    assert!(rendered.contains("^--"), "{rendered}");
    assert!(rendered.contains("Syntax Error"), "{rendered}");
}

#[test]
fn test_runtime_divide_by_zero_is_execute_error() {
    let store = MemStore::from_pairs([("e1", "0")]);
    let opt = Optimizer::new("select int(key) / int(value) as d where key = 'e1'");
    let mut plan = opt.build_plan(&store).unwrap();
    let mut ctx = ExecuteCtx::new();
    let err = plan.next(&mut ctx).unwrap_err();
    assert!(err.is_execute());
    assert!(err.to_string().contains("Divide by zero"));
}

#[test]
fn test_inverted_between_bounds_fail_at_runtime() {
    let store = MemStore::from_pairs([("b1", "5")]);
    let opt = Optimizer::new("where int(value) between 9 and 1");
    let mut plan = opt.build_plan(&store).unwrap();
    let mut ctx = ExecuteCtx::new();
    let err = plan.next(&mut ctx).unwrap_err();
    assert!(err.is_execute());
    assert!(err.to_string().contains("lower boundary"));
}

#[test]
fn test_user_registered_function_usable_in_query() {
    use keyql_core::{register_scalar_function, ScalarFunc, ValueType};
    use std::sync::Arc;

    register_scalar_function(ScalarFunc {
        name: "double_len",
        num_args: 1,
        var_args: false,
        return_type: ValueType::Number,
        body: Arc::new(|kv, args, ctx| {
            let v = args[0].eval(kv, ctx)?;
            Ok(Value::Int(v.length()? * 2))
        }),
        body_vec: None,
    });

    let store = MemStore::from_pairs([("f1", "abc")]);
    let rows = run(&store, "select double_len(value) as d where key = 'f1'");
    assert_eq!(int(&rows[0][0]), 6);
}
