//! Algebraic properties of the metric kernel, checked over random input.

use proptest::prelude::*;

use metrikit::{MetricMeasure, SymTensor, fixtures};

proptest! {
    #[test]
    fn test_metric_log_exp_round_trip(
        a in 0.1f64..10.0,
        b in 0.1f64..10.0,
        c in 0.1f64..10.0,
        off in -0.2f64..0.2,
    ) {
        // diagonally dominant, hence SPD
        let m = SymTensor([a + 1.0, off, off, b + 1.0, off, c + 1.0]);
        let round = m.log().unwrap().exp();
        for i in 0..6 {
            prop_assert!((round.0[i] - m.0[i]).abs() < 1e-8 * (1.0 + m.0[i].abs()));
        }
    }

    #[test]
    fn test_bary4_partitions_unity_inside(
        x in 0.01f64..0.3,
        y in 0.01f64..0.3,
        z in 0.01f64..0.3,
    ) {
        let grid = fixtures::single_tet();
        let (ok, bary) = grid.nodes.bary4(&[0, 1, 2, 3], &[x, y, z]);
        prop_assert!(ok);
        let sum: f64 = bary.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-12);
        prop_assert!(bary.iter().all(|&v| v >= -1e-12));
    }

    #[test]
    fn test_ratio_is_symmetric(
        x in -1.0f64..1.0,
        y in -1.0f64..1.0,
        z in -1.0f64..1.0,
        h in 0.1f64..5.0,
    ) {
        let mut grid = fixtures::single_tet();
        grid.nodes.node_mut(1).xyz = [x, y, z];
        grid.nodes.metric_set(0, SymTensor::from_h(h)).unwrap();
        let forward = grid.nodes.ratio(0, 1).unwrap();
        let backward = grid.nodes.ratio(1, 0).unwrap();
        prop_assert!((forward - backward).abs() < 1e-12);
        prop_assert!(forward >= 0.0);
    }

    #[test]
    fn test_quality_never_exceeds_one(
        x in 0.1f64..2.0,
        y in 0.1f64..2.0,
        z in 0.1f64..2.0,
    ) {
        let mut grid = fixtures::single_tet();
        grid.nodes.node_mut(3).xyz = [0.0, 0.0, z];
        grid.nodes.node_mut(1).xyz = [x, 0.0, 0.0];
        grid.nodes.node_mut(2).xyz = [0.0, y, 0.0];
        let quality = grid.nodes.tet_quality(&[0, 1, 2, 3]).unwrap();
        prop_assert!(quality <= 1.0 + 1e-12);
    }
}
