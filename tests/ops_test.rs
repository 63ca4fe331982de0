use dtm_explorer::protocol::Status;
use dtm_explorer::{EngineConfig, Response, Session};
use serde_json::{json, Value};

fn send(session: &mut Session, request: Value) -> Response {
    session.dispatch(serde_json::from_value(request).unwrap())
}

/// Two topics over docs 0..=2:
///   topic 0: doc0=3, doc2=7
///   topic 1: doc1=2, doc2=5
fn scenario_matrix() -> Value {
    json!({"i": [0, 2, 1, 2], "p": [0, 2, 4], "x": [3, 7, 2, 5]})
}

/// Docs keyed ["2000", "2000", "2001"], topic 0 = [1, 1, 2], topic 1 = [1, 0, 2].
fn year_session() -> Session {
    let mut session = Session::new(EngineConfig::default());
    let r = send(
        &mut session,
        json!({"kind": "load_matrix", "dt": {"i": [0, 1, 2, 0, 2], "p": [0, 3, 5], "x": [1, 1, 2, 1, 2]}}),
    );
    assert!(r.is_ok());
    let r = send(
        &mut session,
        json!({"kind": "load_categories", "variable": "year", "keys": ["2000", "2000", "2001"]}),
    );
    assert!(r.is_ok());
    session
}

fn approx(v: &Value, expected: f64) {
    let got = v.as_f64().unwrap();
    assert!((got - expected).abs() < 1e-12, "expected {expected}, got {got}");
}

#[test]
fn ops_load_matrix_reports_shape() {
    let mut session = Session::new(EngineConfig::default());
    let r = send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));
    assert_eq!(r.key, "load_matrix");
    assert_eq!(r.status, Status::Ok);
    assert_eq!(r.result["n_docs"], 3);
    assert_eq!(r.result["n_topics"], 2);
    assert_eq!(r.result["proper"], false);
}

#[test]
fn ops_matrix_scenario() {
    let mut session = Session::new(EngineConfig::default());
    send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));

    let r = send(&mut session, json!({"kind": "total_tokens"}));
    assert_eq!(r.result, json!(17.0));

    let r = send(&mut session, json!({"kind": "topic_total", "topic": "all"}));
    assert_eq!(r.key, "topic_total/all");
    assert_eq!(r.result, json!([10.0, 7.0]));

    let r = send(&mut session, json!({"kind": "topic_total", "topic": 1}));
    assert_eq!(r.key, "topic_total/1");
    assert_eq!(r.result, json!(7.0));

    let r = send(&mut session, json!({"kind": "doc_topics", "doc": 2, "n": 2}));
    assert_eq!(r.key, "doc_topics/2/2");
    assert_eq!(
        r.result,
        json!([{"topic": 0, "weight": 7.0}, {"topic": 1, "weight": 5.0}])
    );

    let r = send(&mut session, json!({"kind": "matrix_info"}));
    assert_eq!(r.result["nnz"], 4);
    assert_eq!(r.result["total_tokens"], json!(17.0));
}

#[test]
fn ops_topic_docs_ranked_by_fraction() {
    let mut session = Session::new(EngineConfig::default());
    send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));

    // doc0 is entirely topic 0 (3/3); doc2 only 7/12.
    let r = send(&mut session, json!({"kind": "topic_docs", "topic": 0, "n": 1}));
    assert_eq!(r.key, "topic_docs/0/1");
    let docs = r.result.as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["doc"], 0);
    approx(&docs[0]["frac"], 1.0);

    let r = send(&mut session, json!({"kind": "topic_docs", "topic": 0, "n": 5}));
    let docs = r.result.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[1]["doc"], 2);
    approx(&docs[1]["frac"], 7.0 / 12.0);
}

#[test]
fn ops_conditional_scenario() {
    let mut session = year_session();

    let r = send(&mut session, json!({"kind": "conditional_total", "variable": "year"}));
    assert_eq!(r.key, "conditional_total/year/all");
    assert_eq!(r.result, json!({"2000": 3.0, "2001": 4.0}));

    let r = send(&mut session, json!({"kind": "conditional_total", "variable": "year", "key": 2001}));
    assert_eq!(r.result, json!(4.0));

    let r = send(&mut session, json!({"kind": "topic_conditional", "variable": "year", "topic": 0}));
    assert_eq!(r.key, "topic_conditional/year/0");
    approx(&r.result["2000"], 2.0 / 3.0);
    approx(&r.result["2001"], 0.5);

    let r = send(&mut session, json!({"kind": "topic_conditional", "variable": "year", "topic": "all"}));
    let per_topic = r.result.as_array().unwrap();
    assert_eq!(per_topic.len(), 2);
    for key in ["2000", "2001"] {
        let sum: f64 = per_topic.iter().map(|t| t[key].as_f64().unwrap()).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}

#[test]
fn ops_topic_docs_conditional_filters_by_key() {
    let mut session = year_session();
    let r = send(
        &mut session,
        json!({"kind": "topic_docs_conditional", "topic": 0, "variable": "year", "key": "2000", "n": 5}),
    );
    assert_eq!(r.key, "topic_docs_conditional/0/year/2000/5");
    let docs: Vec<u64> = r
        .result
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["doc"].as_u64().unwrap())
        .collect();
    assert_eq!(docs, vec![1, 0]);
}

#[test]
fn ops_categories_before_matrix_are_kept() {
    let mut session = Session::new(EngineConfig::default());
    let r = send(
        &mut session,
        json!({"kind": "load_categories", "variable": "year", "keys": [1999, 1999, 2000]}),
    );
    assert!(r.is_ok());
    assert_eq!(r.result["len"], 3);

    send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));
    let r = send(&mut session, json!({"kind": "conditional_total", "variable": "year"}));
    assert_eq!(r.result, json!({"1999": 5.0, "2000": 12.0}));
}

#[test]
fn ops_not_ready_until_loaded() {
    let mut session = Session::new(EngineConfig::default());

    let r = send(&mut session, json!({"kind": "topic_docs", "topic": 0, "n": 3}));
    assert_eq!(r.status, Status::NotReady);
    assert_eq!(r.result, json!({"missing": "matrix"}));

    send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));
    let r = send(&mut session, json!({"kind": "topic_conditional", "variable": "year", "topic": 0}));
    assert_eq!(r.status, Status::NotReady);
    assert_eq!(r.result, json!({"missing": "categories", "variable": "year"}));

    let r = send(&mut session, json!({"kind": "topic_words", "topic": 0, "n": 3}));
    assert_eq!(r.status, Status::NotReady);
    assert_eq!(r.result, json!({"missing": "topic_words"}));
}

#[test]
fn ops_out_of_range_topic_is_error() {
    let mut session = Session::new(EngineConfig::default());
    send(&mut session, json!({"kind": "load_matrix", "dt": scenario_matrix()}));

    let r = send(&mut session, json!({"kind": "topic_docs", "topic": 2, "n": 3}));
    assert_eq!(r.status, Status::Error);
    assert_eq!(r.result["code"], "TOPIC_OUT_OF_RANGE");

    // Documents past the extent simply have no weight.
    let r = send(&mut session, json!({"kind": "doc_topics", "doc": 99, "n": 3}));
    assert_eq!(r.status, Status::Ok);
    assert_eq!(r.result, json!([]));
}

#[test]
fn ops_malformed_matrix_is_error() {
    let mut session = Session::new(EngineConfig::default());
    let r = send(
        &mut session,
        json!({"kind": "load_matrix", "dt": {"i": [1, 0], "p": [0, 2], "x": [1, 1]}}),
    );
    assert_eq!(r.status, Status::Error);
    assert_eq!(r.result["code"], "MALFORMED_MATRIX");
}

#[test]
fn ops_new_matrix_replaces_caches() {
    let mut session = year_session();
    let r = send(&mut session, json!({"kind": "conditional_total", "variable": "year", "key": "2000"}));
    assert_eq!(r.result, json!(3.0));

    // Same shape, doubled weights: nothing cached from the first matrix survives.
    send(
        &mut session,
        json!({"kind": "load_matrix", "dt": {"i": [0, 1, 2, 0, 2], "p": [0, 3, 5], "x": [2, 2, 4, 2, 4]}}),
    );
    let r = send(&mut session, json!({"kind": "conditional_total", "variable": "year", "key": "2000"}));
    assert_eq!(r.result, json!(6.0));
}

#[test]
fn ops_topic_words_and_word_topics() {
    let mut session = Session::new(EngineConfig::default());
    let r = send(
        &mut session,
        json!({"kind": "load_topic_words", "tw": {
            "alpha": [0.5, 0.5],
            "tw": [
                {"words": ["ship", "sea", "sail"], "weights": [9, 4, 1]},
                {"words": ["law", "court", "sea"], "weights": [8, 3, 2]}
            ]
        }}),
    );
    assert_eq!(r.result, json!({"success": true, "n_topics": 2}));

    let r = send(&mut session, json!({"kind": "topic_words", "topic": 0, "n": 2}));
    assert_eq!(r.key, "topic_words/0/2");
    assert_eq!(
        r.result,
        json!([{"word": "ship", "weight": 9.0}, {"word": "sea", "weight": 4.0}])
    );

    let r = send(&mut session, json!({"kind": "topic_words", "n": 1}));
    assert_eq!(r.key, "topic_words/all/1");
    assert_eq!(r.result.as_array().unwrap().len(), 2);

    let r = send(&mut session, json!({"kind": "word_topics", "word": "sea", "n": 5}));
    assert_eq!(r.key, "word_topics/sea/5");
    assert_eq!(r.result, json!([{"topic": 0, "rank": 1}, {"topic": 1, "rank": 2}]));
}
