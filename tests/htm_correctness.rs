//! End-to-end correctness tests for the HTM engine.
//!
//! These tests drive the public API only: structural invariants of the
//! connections graph under random mutation, spatial pooler output properties,
//! sequence learning in the temporal memory, the homeostatic controller wired
//! into the pooler, and lossless text persistence.
//!
//! Run with: `cargo test --test htm_correctness`

use approx::assert_abs_diff_eq;
use cortical::algorithms::anomaly_score;
use cortical::prelude::*;
use cortical::CorticalError;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

fn dense(num_inputs: usize, active: &[usize]) -> Vec<u8> {
    let mut input = vec![0u8; num_inputs];
    for &bit in active {
        input[bit] = 1;
    }
    input
}

fn sp_config(num_inputs: usize, num_columns: usize) -> HtmConfig {
    let mut config = HtmConfig::new(&[num_inputs], &[num_columns]);
    config.potential_radius = -1;
    config.potential_pct = 0.5;
    config.stimulus_threshold = 1.0;
    config.num_active_columns_per_inh_area = (num_columns / 20).max(1) as f64;
    config.cells_per_column = 4;
    config.activation_threshold = 3;
    config.min_threshold = 2;
    config.max_new_synapse_count = 6;
    config.initial_permanence = 0.55;
    config
}

// =============================================================================
// CONNECTIONS INVARIANTS
// =============================================================================

mod connections_invariants {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        CreateSegment(CellIdx),
        CreateSynapse(usize, CellIdx, f64),
        DestroySegment(usize),
        DestroySynapse(usize),
        Touch(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..64).prop_map(Op::CreateSegment),
            (0usize..64, 0u32..64, 0.0f64..1.0).prop_map(|(s, c, p)| Op::CreateSynapse(s, c, p)),
            (0usize..64).prop_map(Op::DestroySegment),
            (0usize..64).prop_map(Op::DestroySynapse),
            (0usize..64).prop_map(Op::Touch),
        ]
    }

    fn live_segments(mem: &Connections) -> Vec<Segment> {
        (0..mem.segment_flat_list_len() as Segment)
            .filter(|&s| mem.is_live_segment(s))
            .collect()
    }

    fn apply(mem: &mut Connections, op: &Op) {
        let live = live_segments(mem);
        match *op {
            Op::CreateSegment(cell) => {
                mem.create_distal_segment(cell).unwrap();
            }
            Op::CreateSynapse(pick, cell, permanence) if !live.is_empty() => {
                mem.create_synapse(live[pick % live.len()], cell, permanence).unwrap();
            }
            Op::DestroySegment(pick) if !live.is_empty() => {
                mem.destroy_segment(live[pick % live.len()]).unwrap();
            }
            Op::DestroySynapse(pick) if !live.is_empty() => {
                let segment = live[pick % live.len()];
                if let Some(&synapse) = mem.synapses_of(segment).unwrap().first() {
                    mem.destroy_synapse(synapse, segment).unwrap();
                }
            }
            Op::Touch(pick) if !live.is_empty() => {
                mem.record_segment_activity(live[pick % live.len()]).unwrap();
                mem.start_new_iteration();
            }
            _ => {}
        }
    }

    fn connections() -> Connections {
        let mut config = HtmConfig::new(&[16], &[16]);
        config.cells_per_column = 4;
        config.max_segments_per_cell = 3;
        config.max_synapses_per_segment = 5;
        Connections::new(config).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_random_mutation_keeps_invariants(ops in proptest::collection::vec(op(), 1..150)) {
            let mut mem = connections();
            for op in &ops {
                apply(&mut mem, op);
            }

            prop_assert!(mem.check_invariants().is_ok());
            for cell in 0..mem.num_cells() as CellIdx {
                prop_assert!(mem.num_segments_of(cell) <= 3);
            }
            let live = live_segments(&mem);
            prop_assert_eq!(live.len(), mem.num_segments());
            let total: usize = live.iter().map(|&s| mem.synapses_of(s).unwrap().len()).sum();
            prop_assert_eq!(total, mem.num_synapses());
        }

        #[test]
        fn prop_potential_tally_bounds_active_tally(
            ops in proptest::collection::vec(op(), 1..100),
            active in proptest::collection::vec(0u32..64, 0..32),
        ) {
            let mut mem = connections();
            for op in &ops {
                apply(&mut mem, op);
            }
            let mut active = active;
            active.sort_unstable();
            active.dedup();

            let activity = mem.compute_activity(&active, 0.5);
            for segment in live_segments(&mem) {
                prop_assert!(activity.active(segment) <= activity.potential(segment));
                prop_assert!(activity.potential(segment) as usize <= mem.synapses_of(segment).unwrap().len());
            }
        }

        #[test]
        fn prop_text_persistence_is_lossless(ops in proptest::collection::vec(op(), 1..80)) {
            let mut mem = connections();
            for op in &ops {
                apply(&mut mem, op);
            }
            let text = mem.to_text().unwrap();
            let restored = Connections::from_text(&text).unwrap();
            prop_assert_eq!(restored.to_text().unwrap(), text);
        }
    }

    #[test]
    fn test_eviction_makes_room_before_insert() {
        let mut mem = connections();
        let first = mem.create_distal_segment(7).unwrap();
        mem.start_new_iteration();
        let second = mem.create_distal_segment(7).unwrap();
        let third = mem.create_distal_segment(7).unwrap();
        mem.record_segment_activity(second).unwrap();
        mem.record_segment_activity(third).unwrap();

        let fourth = mem.create_distal_segment(7).unwrap();
        assert!(!mem.is_live_segment(first));
        assert_eq!(fourth, first);
        assert_eq!(mem.segments_of(7).unwrap(), &[second, third, fourth]);
    }
}

// =============================================================================
// SPATIAL POOLER
// =============================================================================

mod spatial_pooler {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn prop_output_sorted_sparse_and_bounded(
            bits in proptest::collection::vec(0usize..128, 0..40),
            learn in any::<bool>(),
        ) {
            let mut mem = Connections::new(sp_config(128, 200)).unwrap();
            let mut sp = SpatialPooler::init(&mut mem).unwrap();
            let input = dense(128, &bits);

            let active = sp.compute(&mut mem, &input, learn).unwrap();
            prop_assert!(active.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(active.len() <= 10);
            prop_assert!(active.iter().all(|&c| (c as usize) < 200));
            if bits.is_empty() {
                prop_assert!(active.is_empty());
            }
            prop_assert!(mem.check_invariants().is_ok());
        }
    }

    #[test]
    fn test_same_seed_same_network() {
        let input = dense(128, &[3, 9, 27, 40, 41, 42, 80, 81, 99, 120]);
        let run = || {
            let mut mem = Connections::new(sp_config(128, 200)).unwrap();
            let mut sp = SpatialPooler::init(&mut mem).unwrap();
            let outputs: Vec<Vec<ColumnIdx>> = (0..5).map(|_| sp.compute(&mut mem, &input, true).unwrap()).collect();
            (outputs, mem.to_text().unwrap())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_learning_is_stable_for_repeated_input() {
        let mut mem = Connections::new(sp_config(128, 200)).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();
        let input = dense(128, &(0..128).step_by(5).collect::<Vec<_>>());

        let mut last = Vec::new();
        for _ in 0..30 {
            last = sp.compute(&mut mem, &input, true).unwrap();
        }
        let again = sp.compute(&mut mem, &input, false).unwrap();
        assert!(!again.is_empty());
        let shared = again.iter().filter(|c| last.contains(c)).count();
        assert!(shared * 2 >= again.len());
    }

    #[test]
    fn test_duty_cycles_stay_in_unit_range() {
        let mut mem = Connections::new(sp_config(64, 100)).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();
        for step in 0..40 {
            let bits: Vec<usize> = (0..64).filter(|b| (b + step) % 7 == 0).collect();
            sp.compute(&mut mem, &dense(64, &bits), true).unwrap();
        }
        assert!(mem.active_duty_cycles().iter().all(|d| (0.0..=1.0).contains(d)));
        assert!(mem.overlap_duty_cycles().iter().all(|d| (0.0..=1.0).contains(d)));
        let active_sum: f64 = mem.active_duty_cycles().iter().sum();
        assert_abs_diff_eq!(active_sum / 100.0, 0.05, epsilon = 0.02);
    }

    #[test]
    fn test_local_inhibition_2d() {
        let mut config = HtmConfig::new(&[16, 16], &[16, 16]);
        config.potential_radius = 3;
        config.global_inhibition = false;
        config.stimulus_threshold = 1.0;
        config.num_active_columns_per_inh_area = 2.0;
        let mut mem = Connections::new(config).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();

        let bits: Vec<usize> = (0..256).filter(|b| b % 3 == 0).collect();
        let active = sp.compute(&mut mem, &dense(256, &bits), true).unwrap();
        assert!(!active.is_empty());
        assert!(active.len() < 256 / 2);
        assert!(mem.inhibition_radius() >= 1);
    }
}

// =============================================================================
// HOMEOSTATIC PLASTICITY
// =============================================================================

mod homeostatic {
    use super::*;

    #[test]
    fn test_controller_switches_boosting_off_after_warm_up() {
        let mut mem = Connections::new(sp_config(64, 100)).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let controller = HomeostaticPlasticityController::new(10, move |e: StabilityEvent| sink.lock().unwrap().push(e))
            .with_required_stable_cycles(5)
            .unwrap();
        sp.attach_homeostatic_controller(controller);

        let patterns = [dense(64, &[1, 2, 3, 10, 20, 30]), dense(64, &[40, 41, 50, 60, 61, 63])];
        for _ in 0..5 {
            for input in &patterns {
                sp.compute(&mut mem, input, true).unwrap();
            }
        }
        assert_eq!(mem.config().max_boost, 10.0);

        for _ in 0..40 {
            for input in &patterns {
                sp.compute(&mut mem, input, true).unwrap();
            }
        }
        assert_eq!(mem.config().max_boost, 0.0);
        assert_eq!(mem.config().min_pct_active_duty_cycles, 0.0);

        let controller = sp.homeostatic_controller().unwrap();
        assert_eq!(controller.num_patterns(), 2);
        assert_eq!(controller.cycle(), 90);
        for event in events.lock().unwrap().iter() {
            assert_eq!(event.num_patterns, 2);
            assert!(event.cycle >= 10);
        }

        let detached = sp.detach_homeostatic_controller().unwrap();
        sp.compute(&mut mem, &patterns[0], true).unwrap();
        assert_eq!(detached.cycle(), 90);
    }
}

// =============================================================================
// TEMPORAL MEMORY
// =============================================================================

mod temporal_memory {
    use super::*;

    fn tm_connections() -> Connections {
        let mut config = HtmConfig::new(&[64], &[64]);
        config.cells_per_column = 8;
        config.activation_threshold = 3;
        config.min_threshold = 2;
        config.max_new_synapse_count = 8;
        config.initial_permanence = 0.55;
        config.connected_permanence = 0.5;
        config.predicted_segment_decrement = 0.01;
        Connections::new(config).unwrap()
    }

    #[test]
    fn test_learns_high_order_sequence() {
        let mut mem = tm_connections();
        let tm = TemporalMemory::init(&mut mem).unwrap();

        let a: Vec<ColumnIdx> = (0..8).collect();
        let b: Vec<ColumnIdx> = (8..16).collect();
        let c: Vec<ColumnIdx> = (16..24).collect();
        let d: Vec<ColumnIdx> = (24..32).collect();

        for _ in 0..10 {
            for pattern in [&a, &b, &c, &d] {
                tm.compute(&mut mem, pattern, true).unwrap();
            }
            tm.reset(&mut mem);
        }

        tm.compute(&mut mem, &a, false).unwrap();
        let after_b = tm.compute(&mut mem, &b, false).unwrap();
        assert_eq!(after_b.active_cells.len(), b.len(), "B should be fully predicted");
        assert_eq!(after_b.predictive_columns(8), c);

        let after_c = tm.compute(&mut mem, &c, false).unwrap();
        assert_eq!(after_c.predictive_columns(8), d);
        mem.check_invariants().unwrap();
    }

    #[test]
    fn test_anomaly_drops_once_learned() {
        let mut mem = tm_connections();
        let tm = TemporalMemory::init(&mut mem).unwrap();
        let a: Vec<ColumnIdx> = (32..40).collect();
        let b: Vec<ColumnIdx> = (40..48).collect();

        let first = tm.compute(&mut mem, &a, true).unwrap();
        assert_eq!(anomaly_score(&b, &first.predictive_columns(8)), 1.0);

        for _ in 0..5 {
            tm.reset(&mut mem);
            tm.compute(&mut mem, &a, true).unwrap();
            tm.compute(&mut mem, &b, true).unwrap();
        }
        tm.reset(&mut mem);
        let cycle = tm.compute(&mut mem, &a, false).unwrap();
        assert_eq!(anomaly_score(&b, &cycle.predictive_columns(8)), 0.0);
    }

    #[test]
    fn test_predictive_cells_are_parents_of_active_segments() {
        let mut mem = tm_connections();
        let tm = TemporalMemory::init(&mut mem).unwrap();
        for _ in 0..3 {
            tm.compute(&mut mem, &[1, 2, 3, 4], true).unwrap();
            tm.compute(&mut mem, &[10, 11, 12, 13], true).unwrap();
        }
        let cycle = tm.compute(&mut mem, &[1, 2, 3, 4], true).unwrap();

        let mut expected: Vec<CellIdx> = cycle
            .active_segments
            .iter()
            .map(|&s| mem.segment(s).unwrap().parent_cell())
            .collect();
        expected.dedup();
        assert_eq!(cycle.predictive_cells(), expected.as_slice());
        assert!(cycle
            .active_segments
            .windows(2)
            .all(|w| mem.segment(w[0]).unwrap().sort_key() < mem.segment(w[1]).unwrap().sort_key()));
    }
}

// =============================================================================
// TEXT PERSISTENCE
// =============================================================================

mod persistence {
    use super::*;

    #[test]
    fn test_restored_network_continues_identically() {
        let mut mem = Connections::new(sp_config(64, 128)).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();
        let tm = TemporalMemory::init(&mut mem).unwrap();
        sp.attach_homeostatic_controller(HomeostaticPlasticityController::detached(20));

        let inputs: Vec<Vec<u8>> = (0..6)
            .map(|k| dense(64, &(0..64).filter(|b| (b * 7 + k) % 9 == 0).collect::<Vec<_>>()))
            .collect();

        for input in &inputs {
            let active = sp.compute(&mut mem, input, true).unwrap();
            tm.compute(&mut mem, &active, true).unwrap();
        }

        let mut writer = HtmWriter::new(Vec::new());
        mem.persist(&mut writer).unwrap();
        sp.persist(&mut writer).unwrap();
        let bytes = writer.into_inner();

        let mut reader = HtmReader::new(bytes.as_slice());
        let mut mem2 = Connections::restore(&mut reader).unwrap();
        let mut sp2: SpatialPooler = SpatialPooler::restore(&mut reader).unwrap();
        let tm2 = TemporalMemory::init(&mut mem2).unwrap();
        mem2.check_invariants().unwrap();

        // init clears the cycle state; do the same on the first network
        tm.reset(&mut mem);

        for input in inputs.iter().cycle().take(12) {
            let a1 = sp.compute(&mut mem, input, true).unwrap();
            let a2 = sp2.compute(&mut mem2, input, true).unwrap();
            assert_eq!(a1, a2);

            let c1 = tm.compute(&mut mem, &a1, true).unwrap();
            let c2 = tm2.compute(&mut mem2, &a2, true).unwrap();
            assert_eq!(c1, c2);
        }
        assert_eq!(mem.to_text().unwrap(), mem2.to_text().unwrap());
        assert_eq!(sp.homeostatic_controller(), sp2.homeostatic_controller());
    }

    fn one_synapse_text() -> String {
        let mut mem = Connections::new(sp_config(16, 16)).unwrap();
        let segment = mem.create_distal_segment(0).unwrap();
        mem.create_synapse(segment, 5, 0.4).unwrap();
        mem.to_text().unwrap()
    }

    fn with_field(text: &str, name: &str, value: &str) -> String {
        let prefix = format!("{name}: ");
        assert!(text.lines().any(|line| line.starts_with(&prefix)), "no field {name}");
        text.lines()
            .map(|line| if line.starts_with(&prefix) { format!("{prefix}{value}") } else { line.to_string() })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_out_of_range_handles_are_rejected() {
        let text = one_synapse_text();
        Connections::from_text(&text).unwrap();

        let corrupted = [
            ("segment", "0|0|0|999"),
            ("synapse", "999|0|0|0.4|false"),
            ("synapse", "5|7|0|0.4|false"),
            ("receptors", "5|999"),
            ("receptors", "6|0"),
            ("free_synapses", "7"),
            ("free_flat_indices", "0"),
            ("active_cells", "9999"),
            ("matching_segments", "4"),
        ];
        for (name, value) in corrupted {
            match Connections::from_text(&with_field(&text, name, value)) {
                Err(CorticalError::Parse { .. }) => {}
                other => panic!("{name}: {value} should not restore, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_truncated_stream_reports_line() {
        let mem = Connections::new(sp_config(16, 16)).unwrap();
        let text = mem.to_text().unwrap();
        let truncated: String = text.lines().take(20).collect::<Vec<_>>().join("\n");

        match Connections::from_text(&truncated) {
            Err(CorticalError::Parse { line, .. }) => assert!(line >= 20),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
