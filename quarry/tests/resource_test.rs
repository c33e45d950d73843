use cobble::failpoint;
use cobble::pager::open_file_count;
use quarry::config::{JoinAlgorithm, PlanConfig, SortAlgorithm};
use quarry::errors::ExecutionError;

mod common;
use common::sailors_db;

const JOIN: &str = "SELECT * FROM Sailors S, Reserves R, Boats B \
                    WHERE S.A = R.G AND R.H < B.F ORDER BY S.C";

fn external_smj() -> PlanConfig {
    PlanConfig {
        join: JoinAlgorithm::Smj,
        sort: SortAlgorithm::External,
        sort_buffer_pages: 3,
        ..PlanConfig::default()
    }
}

#[test]
fn failed_reads_close_every_file() {
    let db = sailors_db();
    let interpreter = db.interpreter(external_smj());
    let baseline = open_file_count();

    let mut failures = 0;
    let mut passes = 0;
    loop {
        failpoint::enable_after("pager.read_page", passes);
        let result = interpreter.run_query(1, JOIN);
        failpoint::disable("pager.read_page");

        assert_eq!(open_file_count(), baseline, "files left open after {passes} reads");
        assert_eq!(db.temp_entries(), 0, "scratch left behind after {passes} reads");
        match result {
            Ok(_) => break,
            Err(err) => {
                assert!(matches!(err, ExecutionError::Io { .. }), "{err}");
                failures += 1;
            }
        }
        passes += 1;
        assert!(passes < 500, "query never completed");
    }
    assert!(failures > 0);
    assert!(!db.output(1).is_empty());
}

#[test]
fn failed_query_leaves_no_output_and_the_next_one_runs() {
    let db = sailors_db();
    db.queries(&format!("{JOIN};"));
    let interpreter = db.interpreter(external_smj());
    let baseline = open_file_count();

    failpoint::enable("pager.read_page");
    let summary = interpreter.run().unwrap();
    failpoint::disable("pager.read_page");
    assert_eq!(summary.failed, 1);
    assert!(!db.has_output(1));
    assert_eq!(open_file_count(), baseline);

    let summary = interpreter.run().unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(db.has_output(1));
    assert_eq!(open_file_count(), baseline);
}

#[test]
fn relation_removed_after_loading_names_the_table() {
    let db = sailors_db();
    let interpreter = db.interpreter(PlanConfig::default());
    std::fs::remove_file(db.db_dir().join("data/Boats")).unwrap();

    let err = interpreter.run_query(1, "SELECT * FROM Boats").unwrap_err();
    assert!(err.to_string().contains("Boats"), "{err}");
    assert_eq!(open_file_count(), 0);
}

#[test]
fn relation_missing_at_load_fails_only_its_queries() {
    let db = sailors_db();
    let schema = db.db_dir().join("schema.txt");
    let mut text = std::fs::read_to_string(&schema).unwrap();
    text.push_str("Ghost X Y\n");
    std::fs::write(&schema, text).unwrap();
    db.queries(
        "SELECT * FROM Boats;\n\
         SELECT * FROM Ghost;\n\
         SELECT * FROM Sailors S, Ghost G WHERE S.A = G.X;\n\
         SELECT Reserves.H FROM Reserves WHERE Reserves.G = 4;",
    );

    let interpreter = db.interpreter(PlanConfig::default());
    let summary = interpreter.run().unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(
        db.output(1),
        vec![vec![12, 143, 196], vec![30, 63, 101], vec![57, 24, 130]]
    );
    assert!(!db.has_output(2));
    assert!(!db.has_output(3));
    assert_eq!(db.output(4), vec![vec![104]]);

    let err = interpreter.run_query(2, "SELECT * FROM Ghost").unwrap_err();
    assert!(matches!(&err, ExecutionError::Io { context, .. } if context == "relation Ghost"), "{err}");
    assert_eq!(open_file_count(), 0);
}
