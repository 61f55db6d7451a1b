//! Integration tests for the compilation portal, driven by the tracing harness

mod common;
use common::{loop_triples, recording_jit, recording_jit_with};
use jitportal::config::JitConfig;
use jitportal::metainterp::programs::{BranchyCounter, GreenCounter, GreenState, QuasiImmutCounter, ScaledSum};
use jitportal::portal::{KeyState, PortalEvent};
use jitportal::AbortReason;
use pretty_assertions::assert_eq;

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quasi_immut_write_aborts_every_trace() {
        let (mut jit, recorder) = recording_jit();
        let mut program = QuasiImmutCounter::setup(jit.heap_mut(), 100).unwrap();
        let state = jit.run(&mut program, QuasiImmutCounter::start(7)).unwrap();

        assert_eq!(state.total, 721);
        assert_eq!(
            recorder.aborts(),
            vec![AbortReason::ForcedQuasiImmutable, AbortReason::ForcedQuasiImmutable]
        );
        assert!(recorder.compiled_loops().is_empty());
        assert_eq!(jit.heap().get(program.foo(), "a").unwrap(), 107);
    }

    #[test]
    fn test_on_compile_records_each_key() {
        let entry = GreenCounter::entry_point();
        let (mut jit, recorder) = recording_jit();
        let mut program = GreenCounter::new(&entry, 1, 4);
        let state = jit.run(&mut program, GreenState::default()).unwrap();
        assert_eq!(state, GreenState { i: 4, total: 4 });
        assert_eq!(loop_triples(&recorder), vec![(4, 1, "loop")]);
        let first = recorder.compiled_loops()[0].2;

        // Same harness: the second key gets its own loop, the first stays live
        let mut program = GreenCounter::new(&entry, 2, 4);
        jit.run(&mut program, GreenState::default()).unwrap();
        assert_eq!(loop_triples(&recorder), vec![(4, 1, "loop"), (4, 2, "loop")]);
        assert!(jit.registry().is_live(first));
        assert_eq!(jit.registry().live_count(), 2);

        let (mut fresh, _) = recording_jit();
        fresh.add_portal(recorder.clone());
        let mut program = GreenCounter::new(&entry, 2, 4);
        fresh.run(&mut program, GreenState::default()).unwrap();
        assert_eq!(
            loop_triples(&recorder),
            vec![(4, 1, "loop"), (4, 2, "loop"), (4, 2, "loop")]
        );
    }

    #[test]
    fn test_bridge_follows_its_loop() {
        let (mut jit, recorder) = recording_jit();
        let mut program = BranchyCounter::new(10, 4);
        let i = jit.run(&mut program, 1).unwrap();
        assert_eq!(i, 13);

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        let artifact = match &events[0] {
            PortalEvent::Compile {
                artifact,
                kind,
                operations,
                ..
            } => {
                assert_eq!(kind.as_str(), "loop");
                assert_eq!(operations, &vec!["label()", "guard_false(#0)", "jump()"]);
                *artifact
            }
            other => panic!("expected a loop first, got {:?}", other),
        };
        let bridge = match &events[1] {
            PortalEvent::Bridge {
                orig,
                bridge,
                fail_index,
                address,
                length,
                ..
            } => {
                assert_eq!(*orig, artifact);
                assert_eq!(*fail_index, 0);
                assert_eq!((*address, *length), (0, 0));
                *bridge
            }
            other => panic!("expected a bridge second, got {:?}", other),
        };

        assert_eq!(jit.dispatcher().bridge_parent(bridge), Some(artifact));
        assert_eq!(jit.registry().get(bridge).unwrap().entry_count(), 1);
        let stats = jit.stats();
        assert_eq!(stats.loops_compiled, 1);
        assert_eq!(stats.bridges_compiled, 1);
        assert_eq!(stats.total_aborts(), 0);
    }

    #[test]
    fn test_invalidation_retires_and_recompiles() {
        let (mut jit, recorder) = recording_jit();
        let mut program = ScaledSum::setup(jit.heap_mut(), 1, 12, 6, 10).unwrap();
        let entry = jitportal::metainterp::JitLoop::entry_point(&program).clone();
        let key = entry.make_key([program.cfg()]);
        jit.run(&mut program, GreenState::default()).unwrap();

        let loops = recorder.compiled_loops();
        assert_eq!(loops.len(), 2);
        assert_eq!(
            jit.dispatcher().key_state(&entry, &key),
            KeyState::Compiled { artifact: loops[1].2 }
        );
        let versions = jit.versions().stats();
        assert_eq!(versions.tracked_fields, 1);
        assert_eq!(versions.invalidations, 1);
    }
}

mod properties {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_forced_abort_is_reported() {
        for attempts in 1..=5u32 {
            let (mut jit, recorder) = recording_jit();
            let mut program = QuasiImmutCounter::setup(jit.heap_mut(), 0).unwrap();
            jit.run(&mut program, QuasiImmutCounter::start(3 * i64::from(attempts)))
                .unwrap();
            assert_eq!(
                recorder.aborts(),
                vec![AbortReason::ForcedQuasiImmutable; attempts as usize]
            );
            assert_eq!(
                jit.stats().aborts_for(AbortReason::ForcedQuasiImmutable),
                u64::from(attempts)
            );
        }
    }

    #[test]
    fn test_loop_notified_before_bridges() {
        for flip in 3..8 {
            let (mut jit, recorder) = recording_jit();
            let mut program = BranchyCounter::new(30, flip);
            jit.run(&mut program, 1).unwrap();

            let mut compiled = Vec::new();
            for event in recorder.events() {
                match event {
                    PortalEvent::Compile { artifact, .. } => compiled.push(artifact),
                    PortalEvent::Bridge { orig, .. } => {
                        assert!(compiled.contains(&orig), "bridge on {} before its loop", orig)
                    }
                    PortalEvent::Abort { .. } => {}
                }
            }
        }
    }

    #[test]
    fn test_equal_keys_share_a_slot() {
        let entry = GreenCounter::entry_point();
        let (mut jit, recorder) = recording_jit();
        for _ in 0..3 {
            let mut program = GreenCounter::new(&entry, 1, 6);
            jit.run(&mut program, GreenState::default()).unwrap();
        }
        // Later runs enter the loop compiled by the first
        assert_eq!(loop_triples(&recorder), vec![(6, 1, "loop")]);
        let handle = recorder.compiled_loops()[0].2;
        assert!(jit.registry().get(handle).unwrap().entry_count() > 6);
    }

    #[test]
    fn test_different_keys_never_collide() {
        let entry = GreenCounter::entry_point();
        let (mut jit, recorder) = recording_jit();
        for n in 1..=4 {
            let mut program = GreenCounter::new(&entry, n, 5);
            jit.run(&mut program, GreenState::default()).unwrap();
        }
        let loops = recorder.compiled_loops();
        assert_eq!(loops.len(), 4);
        for (key, _, handle) in &loops {
            assert_eq!(jit.registry().live_loop(&entry, key), Some(*handle));
        }
        assert_eq!(jit.registry().live_count(), 4);
    }

    #[test]
    fn test_results_do_not_depend_on_compilation() {
        let (mut compiled, _) = recording_jit();
        let (mut plain, recorder) = recording_jit_with(JitConfig::from_params("off").unwrap());

        let mut program = BranchyCounter::new(50, 9);
        let a = compiled.run(&mut program, 1).unwrap();
        let mut program = BranchyCounter::new(50, 9);
        let b = plain.run(&mut program, 1).unwrap();
        assert_eq!(a, b);
        assert!(recorder.is_empty());
    }
}

mod limits {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_long_trace_aborts_too_long() {
        let config = JitConfig::from_params("threshold=3,trace_limit=3").unwrap();
        let (mut jit, recorder) = recording_jit_with(config);
        let mut program = ScaledSum::setup(jit.heap_mut(), 1, 10, 100, 0).unwrap();
        jit.run(&mut program, GreenState::default()).unwrap();

        // label, quasiimmut_field, guard_not_invalidated, guard_false
        assert_eq!(recorder.aborts()[0], AbortReason::TooLong);
        assert!(recorder.compiled_loops().is_empty());
    }

    #[test]
    fn test_exit_during_trace_is_bad_loop() {
        let entry = GreenCounter::entry_point();
        let (mut jit, recorder) = recording_jit();
        let mut program = GreenCounter::new(&entry, 1, 3);
        jit.run(&mut program, GreenState::default()).unwrap();
        assert_eq!(recorder.aborts(), vec![AbortReason::BadLoop]);
        assert_eq!(
            jit.dispatcher().key_state(&entry, &entry.make_key([1i64, 3])),
            KeyState::Aborted
        );
    }
}
