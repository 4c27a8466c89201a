use std::collections::BTreeMap;
use std::sync::Arc;

use httpmock::prelude::*;
use profile_crawler::config::Config;
use profile_crawler::ledger::{EventLedger, QueryStatus};
use profile_crawler::parameters::{ClauseValue, FilterClause, HierarchyTable};
use profile_crawler::pipeline::Pipeline;
use serde_json::json;

fn clause(value: &str) -> Vec<FilterClause> {
    vec![FilterClause {
        value: ClauseValue::Single(value.to_string()),
        operator: "is one of".to_string(),
    }]
}

fn base_config(server: &MockServer, dir: &std::path::Path, hierarchy: HierarchyTable) -> Config {
    Config {
        api_key: "test-key".to_string(),
        base_url: server.url("/search"),
        output_dir: dir.join("output"),
        ledger_dir: dir.join("ledger"),
        ledger_base_name: "ledger".to_string(),
        failed_request_log_path: dir.join("failed_requests.log"),
        hierarchy: Arc::new(hierarchy),
    }
}

fn count_response_files(output_dir: &std::path::Path) -> usize {
    std::fs::read_dir(output_dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_layer_happy_path() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();

    let mut layer_values = BTreeMap::new();
    layer_values.insert("layer_a".to_string(), vec![clause("v1")]);
    let hierarchy = HierarchyTable {
        layers: vec!["layer_a".to_string()],
        layer_values,
        skill_subcategories: BTreeMap::new(),
        static_country: clause("GB"),
    };

    let params = json!({"country": clause("GB"), "layer_a": clause("v1")});

    server.mock(|when, then| {
        when.method(POST)
            .path("/search")
            .json_body(json!({
                "reveal_all_data": false,
                "page_number": 1,
                "page_size": 1,
                "parameters": params,
            }));
        then.status(200)
            .json_body(json!({"counts": {"profiles_total_results": 250}}));
    });
    for (page, size) in [(1, 100), (2, 100), (3, 50)] {
        server.mock(|when, then| {
            when.method(POST).path("/search").json_body(json!({
                "reveal_all_data": false,
                "page_number": page,
                "page_size": size,
                "parameters": params,
            }));
            then.status(200).json_body(json!({
                "counts": {"profiles_total_results": 250},
                "results": [],
            }));
        });
    }

    let config = base_config(&server, dir.path(), hierarchy);
    let pipeline = Pipeline::new(config.clone(), 2, false).unwrap();
    pipeline.run().await.unwrap();

    let ledger = EventLedger::open(&config.ledger_dir, &config.ledger_base_name).unwrap();
    let key = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("layer_a", clause("v1"))
        .canonical_key();
    let state = ledger.state_for(&key).unwrap();
    assert_eq!(state.status, QueryStatus::Completed);
    assert_eq!(state.last_completed_page, 3);

    assert_eq!(count_response_files(&config.output_dir), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subdivide_then_complete() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();

    let mut layer_values = BTreeMap::new();
    layer_values.insert("A".to_string(), vec![clause("a1")]);
    layer_values.insert("B".to_string(), vec![clause("b1"), clause("b2")]);
    let hierarchy = HierarchyTable {
        layers: vec!["A".to_string(), "B".to_string()],
        layer_values,
        skill_subcategories: BTreeMap::new(),
        static_country: clause("GB"),
    };

    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 1,
            "page_size": 1,
            "parameters": {"country": clause("GB"), "A": clause("a1")},
        }));
        then.status(200)
            .json_body(json!({"counts": {"profiles_total_results": 12_000}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 1,
            "page_size": 1,
            "parameters": {"country": clause("GB"), "A": clause("a1"), "B": clause("b1")},
        }));
        then.status(200)
            .json_body(json!({"counts": {"profiles_total_results": 500}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 1,
            "page_size": 1,
            "parameters": {"country": clause("GB"), "A": clause("a1"), "B": clause("b2")},
        }));
        then.status(200)
            .json_body(json!({"counts": {"profiles_total_results": 0}}));
    });
    for page in 1..=5u32 {
        server.mock(|when, then| {
            when.method(POST).path("/search").json_body(json!({
                "reveal_all_data": false,
                "page_number": page,
                "page_size": 100,
                "parameters": {"country": clause("GB"), "A": clause("a1"), "B": clause("b1")},
            }));
            then.status(200).json_body(json!({
                "counts": {"profiles_total_results": 500},
                "results": [],
            }));
        });
    }

    let config = base_config(&server, dir.path(), hierarchy);
    let pipeline = Pipeline::new(config.clone(), 2, false).unwrap();
    pipeline.run().await.unwrap();

    let ledger = EventLedger::open(&config.ledger_dir, &config.ledger_base_name).unwrap();

    let key_a1 = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("A", clause("a1"))
        .canonical_key();
    assert_eq!(
        ledger.state_for(&key_a1).unwrap().status,
        QueryStatus::SkippedTooLarge
    );

    let key_b1 = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("A", clause("a1"))
        .with_bound("B", clause("b1"))
        .canonical_key();
    let state_b1 = ledger.state_for(&key_b1).unwrap();
    assert_eq!(state_b1.status, QueryStatus::Completed);
    assert_eq!(state_b1.last_completed_page, 5);

    let key_b2 = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("A", clause("a1"))
        .with_bound("B", clause("b2"))
        .canonical_key();
    assert_eq!(
        ledger.state_for(&key_b2).unwrap().status,
        QueryStatus::SkippedNoResult
    );

    assert_eq!(count_response_files(&config.output_dir), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumes_from_last_completed_page_after_a_crash() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();

    let mut layer_values = BTreeMap::new();
    layer_values.insert("layer_a".to_string(), vec![clause("v1")]);
    let hierarchy = HierarchyTable {
        layers: vec!["layer_a".to_string()],
        layer_values,
        skill_subcategories: BTreeMap::new(),
        static_country: clause("GB"),
    };

    let config = base_config(&server, dir.path(), hierarchy);

    let params = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("layer_a", clause("v1"));
    {
        let prior = EventLedger::open(&config.ledger_dir, &config.ledger_base_name).unwrap();
        prior.log_check(&params, 250, true).unwrap();
        prior.update_page_progress(&params, 1).unwrap();
    }

    for (page, size) in [(2, 100), (3, 50)] {
        server.mock(|when, then| {
            when.method(POST).path("/search").json_body(json!({
                "reveal_all_data": false,
                "page_number": page,
                "page_size": size,
                "parameters": {"country": clause("GB"), "layer_a": clause("v1")},
            }));
            then.status(200).json_body(json!({
                "counts": {"profiles_total_results": 250},
                "results": [],
            }));
        });
    }

    let pipeline = Pipeline::new(config.clone(), 1, false).unwrap();
    pipeline.run().await.unwrap();

    let ledger = EventLedger::open(&config.ledger_dir, &config.ledger_base_name).unwrap();
    let state = ledger.state_for(&params.canonical_key()).unwrap();
    assert_eq!(state.status, QueryStatus::Completed);
    assert_eq!(state.last_completed_page, 3);
    assert_eq!(count_response_files(&config.output_dir), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permanent_failure_mid_run_stops_after_the_failing_page() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();

    let mut layer_values = BTreeMap::new();
    layer_values.insert("layer_a".to_string(), vec![clause("v1")]);
    let hierarchy = HierarchyTable {
        layers: vec!["layer_a".to_string()],
        layer_values,
        skill_subcategories: BTreeMap::new(),
        static_country: clause("GB"),
    };

    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 1,
            "page_size": 1,
            "parameters": {"country": clause("GB"), "layer_a": clause("v1")},
        }));
        then.status(200)
            .json_body(json!({"counts": {"profiles_total_results": 300}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 1,
            "page_size": 100,
            "parameters": {"country": clause("GB"), "layer_a": clause("v1")},
        }));
        then.status(200).json_body(json!({
            "counts": {"profiles_total_results": 300},
            "results": [],
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 2,
            "page_size": 100,
            "parameters": {"country": clause("GB"), "layer_a": clause("v1")},
        }));
        then.status(400);
    });
    let page3 = server.mock(|when, then| {
        when.method(POST).path("/search").json_body(json!({
            "reveal_all_data": false,
            "page_number": 3,
            "page_size": 100,
            "parameters": {"country": clause("GB"), "layer_a": clause("v1")},
        }));
        then.status(200).json_body(json!({
            "counts": {"profiles_total_results": 300},
            "results": [],
        }));
    });

    let config = base_config(&server, dir.path(), hierarchy);
    let pipeline = Pipeline::new(config.clone(), 1, false).unwrap();
    pipeline.run().await.unwrap();

    let ledger = EventLedger::open(&config.ledger_dir, &config.ledger_base_name).unwrap();
    let key = profile_crawler::parameters::ParameterSet::new()
        .with_bound("country", clause("GB"))
        .with_bound("layer_a", clause("v1"))
        .canonical_key();
    let state = ledger.state_for(&key).unwrap();
    assert_eq!(state.status, QueryStatus::Failed);
    assert_eq!(state.failed_at_page, Some(2));
    assert_eq!(state.last_completed_page, 1);

    assert_eq!(count_response_files(&config.output_dir), 1);
    assert_eq!(page3.hits(), 0);
}
