use quarry::config::{JoinAlgorithm, PlanConfig, SortAlgorithm};
use quarry::executor::{collect, ExecContext, Executor, Operator};
use quarry::interpreter::RunSummary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;
use common::{plan, sailors_db, sorted, TestDb};

const JOINS: [JoinAlgorithm; 3] = [JoinAlgorithm::Tnlj, JoinAlgorithm::Bnlj, JoinAlgorithm::Smj];

#[test]
fn equality_on_a_single_table() {
    let db = sailors_db();
    db.queries("SELECT Boats.F, Boats.D FROM Boats WHERE Boats.D = 30;");
    let summary = db.interpreter(PlanConfig::default()).run().unwrap();
    assert_eq!(summary, RunSummary { succeeded: 1, failed: 0 });
    assert_eq!(db.output(1), vec![vec![101, 30]]);
}

#[test]
fn one_matching_pair_under_every_join() {
    let db = TestDb::new();
    db.table("Sailors", &["A", "B", "C"], &[vec![1, 2, 3], vec![4, 5, 6], vec![9, 9, 9]])
        .table("Reserves", &["G", "H"], &[vec![4, 9], vec![7, 8]])
        .queries(
            "SELECT Sailors.A, Sailors.B, Sailors.C, Reserves.G, Reserves.H \
             FROM Sailors, Reserves WHERE Sailors.A = Reserves.G;",
        );

    let mut plans: Vec<PlanConfig> = JOINS.iter().map(|&join| plan(join)).collect();
    plans.push(PlanConfig {
        join: JoinAlgorithm::Bnlj,
        join_buffer_pages: 1,
        ..PlanConfig::default()
    });
    for config in plans {
        let summary = db.interpreter(config.clone()).run().unwrap();
        assert_eq!(summary.failed, 0, "{config:?}");
        assert_eq!(db.output(1), vec![vec![4, 5, 6, 4, 9]], "{config:?}");
    }
}

#[test]
fn join_algorithms_agree_on_generated_relations() {
    let mut rng = StdRng::seed_from_u64(17);
    let sailors: Vec<Vec<i32>> = (0..300)
        .map(|_| vec![rng.gen_range(0..40), rng.gen_range(0..100), rng.gen_range(0..5)])
        .collect();
    let reserves: Vec<Vec<i32>> = (0..200)
        .map(|_| vec![rng.gen_range(0..40), rng.gen_range(0..100)])
        .collect();
    let db = TestDb::new();
    db.table("Sailors", &["A", "B", "C"], &sailors)
        .table("Reserves", &["G", "H"], &reserves)
        .queries(
            "SELECT S.A, S.B, R.H FROM Sailors S, Reserves R \
             WHERE S.A = R.G AND S.B < R.H AND S.C <> 2;",
        );

    let mut expected = Vec::new();
    for s in &sailors {
        for r in &reserves {
            if s[0] == r[0] && s[1] < r[1] && s[2] != 2 {
                expected.push(vec![s[0], s[1], r[1]]);
            }
        }
    }
    let expected = sorted(expected);
    assert!(!expected.is_empty());

    for join in JOINS {
        for sort in [SortAlgorithm::InMemory, SortAlgorithm::External] {
            let config = PlanConfig {
                join,
                sort,
                join_buffer_pages: 1,
                ..PlanConfig::default()
            };
            db.interpreter(config).run().unwrap();
            assert_eq!(sorted(db.output(1)), expected, "{join} {sort:?}");
        }
    }
}

#[test]
fn three_way_join() {
    let db = sailors_db();
    db.queries(
        "SELECT S.C, B.F FROM Sailors S, Reserves R, Boats B \
         WHERE S.A = R.G AND R.H = B.F;",
    );
    for join in JOINS {
        db.interpreter(plan(join)).run().unwrap();
        assert_eq!(sorted(db.output(1)), vec![vec![50, 101], vec![200, 101]], "{join}");
    }
}

#[test]
fn order_by_and_distinct() {
    let db = sailors_db();
    db.queries(
        "SELECT * FROM Sailors S ORDER BY S.B;\n\
         SELECT DISTINCT Reserves.G FROM Reserves ORDER BY Reserves.G;\n\
         SELECT DISTINCT R.H FROM Reserves R WHERE R.G < 3;",
    );
    for sort in [SortAlgorithm::InMemory, SortAlgorithm::External] {
        let config = PlanConfig {
            sort,
            ..PlanConfig::default()
        };
        let summary = db.interpreter(config).run().unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(
            db.output(1),
            vec![
                vec![3, 100, 105],
                vec![4, 100, 50],
                vec![5, 100, 500],
                vec![1, 200, 50],
                vec![2, 200, 200],
                vec![6, 300, 400],
            ]
        );
        assert_eq!(db.output(2), vec![vec![1], vec![2], vec![3], vec![4]]);
        assert_eq!(db.output(3), vec![vec![101], vec![102], vec![103]]);
    }
}

#[test]
fn failed_queries_do_not_stop_the_batch() {
    let db = sailors_db();
    db.queries(
        "SELECT * FROM Boats;\n\
         SELECT * FROM Nowhere;\n\
         SELECT * FROM Boats WHERE Boats.D = 12 OR Boats.D = 30;\n\
         SELECT Boats.D FROM Boats WHERE Boats.E > 50;\n\
         SELECT * FROM Boats WHERE 1 > 2;\n\
         SELECT Boats.Z FROM Boats;",
    );
    let summary = db.interpreter(PlanConfig::default()).run().unwrap();
    assert_eq!(summary, RunSummary { succeeded: 2, failed: 4 });

    assert_eq!(db.output(1).len(), 3);
    assert_eq!(db.output(4), vec![vec![12], vec![30]]);
    for failed in [2, 3, 5, 6] {
        assert!(!db.has_output(failed), "query {failed} left output behind");
    }
    assert!(db.root().join("output/query1_logicalplan").exists());
    assert!(db.root().join("output/query4_physicalplan").exists());
    assert_eq!(db.temp_entries(), 0);
}

#[test]
fn every_operator_resets_to_the_same_output() {
    let db = sailors_db();
    let queries = [
        "SELECT * FROM Sailors WHERE Sailors.B = 100",
        "SELECT S.A, R.H FROM Sailors S, Reserves R WHERE S.A = R.G",
        "SELECT DISTINCT R.G FROM Reserves R",
        "SELECT * FROM Sailors S, Reserves R, Boats B WHERE S.A = R.G AND R.H < B.F ORDER BY B.D",
        "SELECT * FROM Sailors S, Boats B WHERE S.B > B.E",
    ];
    for join in JOINS {
        for sort in [SortAlgorithm::InMemory, SortAlgorithm::External] {
            let interpreter = db.interpreter(PlanConfig {
                join,
                sort,
                ..PlanConfig::default()
            });
            for sql in queries {
                let (_, physical) = interpreter.explain(sql).unwrap();
                let scratch = tempfile::tempdir().unwrap();
                let ctx = ExecContext {
                    catalog: interpreter.catalog(),
                    scratch: scratch.path(),
                };
                let mut root = Operator::build(&physical, &ctx).unwrap();
                let first: Vec<Vec<i32>> = collect(&mut root)
                    .unwrap()
                    .into_iter()
                    .map(|t| t.into_values())
                    .collect();
                root.reset().unwrap();
                let second: Vec<Vec<i32>> = collect(&mut root)
                    .unwrap()
                    .into_iter()
                    .map(|t| t.into_values())
                    .collect();
                assert!(!first.is_empty(), "{sql}");
                assert_eq!(first, second, "{join} {sort:?}: {sql}");
            }
        }
    }
}
