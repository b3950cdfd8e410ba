//! Master/worker protocol tests against a real worker pool

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, clippy::float_cmp)]

mod common;

use common::{assert_converged, init_tracing, recording_group, spawn_group, unique_prefix};
use tandem_array::{ArrayError, DataDirective, Directive, Group, GroupConfig, HostArray};
use tandem_shm::ControlBlock;

#[test]
fn test_create_registers_on_every_worker() {
    let Some(group) = spawn_group("create", 3) else {
        return;
    };
    let data = group.create_data::<f32>(2).expect("create");
    assert_eq!(data.shape(), &[0, 0]);
    assert_eq!(data.alloc_size(), 0);
    assert_eq!(data.tag(), 0);
    assert_converged(&group, &data);
}

#[test]
fn test_set_value_allocates_with_oversize() {
    let Some(group) = spawn_group("oversize", 2) else {
        return;
    };
    let mut data = group.create_data::<f64>(2).expect("create");
    let input = HostArray::new(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]).expect("input");
    data.set_value(&input, false, 1.5).expect("set_value");

    assert_eq!(data.shape(), &[2, 3]);
    assert_eq!(data.alloc_size(), 9);
    assert_eq!(data.tag(), 1);
    assert_eq!(data.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_converged(&group, &data);
}

#[test]
fn test_grow_within_capacity_keeps_tag() {
    let Some(group) = spawn_group("within", 2) else {
        return;
    };
    let mut data = group.create_data::<i32>(1).expect("create");
    data.set_shape(&[4], 2.0).expect("grow");
    assert_eq!(data.alloc_size(), 8);
    assert_eq!(data.tag(), 1);

    data.set_length(8, 2.0).expect("fits");
    assert_eq!(data.alloc_size(), 8);
    assert_eq!(data.tag(), 1);
    assert_converged(&group, &data);

    data.set_length(9, 1.0).expect("realloc");
    assert_eq!(data.alloc_size(), 9);
    assert_eq!(data.tag(), 2);
    assert_converged(&group, &data);
}

#[test]
fn test_invalid_oversize_is_rejected_before_allocation() {
    let Some(group) = spawn_group("badover", 1) else {
        return;
    };
    let mut data = group.create_data::<u8>(1).expect("create");
    for oversize in [0.5, 2.5, f64::NAN] {
        assert!(matches!(
            data.set_length(10, oversize),
            Err(ArrayError::InvalidParameter(_))
        ));
    }
    assert_eq!(data.tag(), 0);
    assert_eq!(data.alloc_size(), 0);
    assert_converged(&group, &data);
}

#[test]
fn test_free_and_reuse() {
    let Some(group) = spawn_group("free", 2) else {
        return;
    };
    let mut data = group.create_data::<u16>(2).expect("create");
    data.set_shape(&[3, 3], 1.0).expect("alloc");
    assert_eq!(data.tag(), 1);

    data.free_memory().expect("free");
    assert_eq!(data.alloc_size(), 0);
    assert_eq!(data.shape(), &[0, 0]);
    assert_converged(&group, &data);

    data.set_shape(&[2, 2], 1.0).expect("realloc");
    assert_eq!(data.alloc_size(), 4);
    assert_eq!(data.tag(), 2);
    assert_converged(&group, &data);
}

#[test]
fn test_workers_share_the_buffer() {
    let Some(group) = spawn_group("share", 3) else {
        return;
    };
    let mut data = group.create_data::<i64>(1).expect("create");
    data.assign(&HostArray::from_vec(vec![10i64, 20, 30]))
        .expect("assign");
    let id = data.id();

    // Each worker writes its rank into its own slot.
    group
        .channel(|pool| {
            pool.visit(move |rank, mirror| {
                assert_eq!(mirror.view::<i64>(id)?.shape(), &[3]);
                mirror.view_mut::<i64>(id)?[rank] = rank as i64 + 100;
                Ok(())
            })
        })
        .expect("visit");

    assert_eq!(data.as_slice(), &[100, 101, 102]);
    assert_eq!(data.get(&[2]), Some(102));
}

#[test]
fn test_multiple_arrays_keep_separate_state() {
    let Some(group) = spawn_group("multi", 2) else {
        return;
    };
    let mut a = group.create_data::<f32>(1).expect("a");
    let mut b = group.create_data::<u32>(3).expect("b");
    assert_ne!(a.id(), b.id());

    a.set_length(5, 1.2).expect("a grow");
    b.set_shape(&[2, 2, 2], 1.0).expect("b grow");
    b.set_shape(&[1, 2, 2], 1.0).expect("b shrink");

    assert_converged(&group, &a);
    assert_converged(&group, &b);
    assert_eq!(b.alloc_size(), 8);
}

#[test]
fn test_visit_failure_keeps_group_usable() {
    let Some(group) = spawn_group("fail", 2) else {
        return;
    };
    let mut data = group.create_data::<u8>(1).expect("create");
    let err = group
        .channel(|pool| {
            pool.visit(|rank, _mirror| {
                if rank == 1 {
                    Err(ArrayError::InvalidParameter("boom".to_string()))
                } else {
                    Ok(())
                }
            })
        })
        .expect_err("visit should fail");
    assert!(matches!(err, ArrayError::GroupFailure(ref msg) if msg.contains("worker 1")));

    // Visiting is outside the directive protocol; the group is still usable.
    assert!(!group.is_failed());
    data.set_length(3, 1.0).expect("still usable");
}

#[test]
fn test_visit_panic_is_reported() {
    let Some(group) = spawn_group("panic", 1) else {
        return;
    };
    let err = group
        .channel(|pool| pool.visit(|_, _| panic!("kernel crashed")))
        .expect_err("panic should surface");
    assert!(matches!(err, ArrayError::GroupFailure(ref msg) if msg.contains("kernel crashed")));
}

#[test]
fn test_idempotent_update_sends_nothing() {
    let Some((group, channel)) = recording_group("idem") else {
        return;
    };
    let mut data = group.create_data::<f32>(2).expect("create");
    data.set_shape(&[4, 4], 1.0).expect("alloc");
    channel.clear();

    let before = data.state();
    data.set_shape(&[4, 4], 2.0).expect("same shape");
    data.set_length(4, 1.0).expect("same length");
    assert_eq!(data.state(), before);
    assert!(channel.launched().is_empty());

    data.set_shape(&[2, 4], 1.0).expect("reshape");
    assert_eq!(
        channel.launched(),
        vec![Directive::Data(DataDirective::Reshape)]
    );
}

#[test]
fn test_set_length_zero_is_rejected() {
    let Some((group, channel)) = recording_group("zero") else {
        return;
    };
    let mut data = group.create_data::<i8>(2).expect("create");
    channel.clear();
    assert!(matches!(
        data.set_length(0, 1.0),
        Err(ArrayError::InvalidParameter(_))
    ));
    assert!(channel.launched().is_empty());
}

#[test]
fn test_dropping_a_handle_frees_on_workers() {
    let Some(group) = spawn_group("dropfree", 2) else {
        return;
    };
    let mut data = group.create_data::<f32>(1).expect("create");
    data.set_shape(&[1000], 1.0).expect("alloc");
    let id = data.id();
    drop(data);

    let states = group
        .channel(|pool| pool.snapshots(id))
        .expect("snapshots");
    assert_eq!(states.len(), 2);
    for state in states {
        let state = state.expect("still registered");
        assert_eq!(state.capacity, 0);
        assert_eq!(state.shape, vec![0]);
        assert_eq!(state.tag, 1);
    }
}

#[test]
fn test_dropping_an_unallocated_handle_sends_nothing() {
    let Some((group, channel)) = recording_group("dropidle") else {
        return;
    };
    let data = group.create_data::<u8>(2).expect("create");
    channel.clear();
    drop(data);
    assert!(channel.launched().is_empty());

    let mut data = group.create_data::<u8>(2).expect("create");
    data.set_shape(&[2, 2], 1.0).expect("alloc");
    channel.clear();
    drop(data);
    assert_eq!(
        channel.launched(),
        vec![Directive::Data(DataDirective::Free)]
    );
}

#[test]
fn test_second_group_cannot_take_over_prefix() {
    init_tracing();
    let config = GroupConfig::new(unique_prefix("takeover")).with_workers(1);
    let group = match Group::spawn(config.clone()) {
        Ok(group) => group,
        Err(e) => {
            eprintln!("skipping shmem test (not available): {e}");
            return;
        }
    };
    let mut data = group.create_data::<i32>(1).expect("create");
    data.assign(&HostArray::from_vec(vec![5i32, 6])).expect("assign");

    assert!(matches!(
        Group::spawn(config.clone()),
        Err(ArrayError::Allocation(_))
    ));
    assert!(matches!(
        Group::with_channel(config, common::RecordingChannel::default()),
        Err(ArrayError::Allocation(_))
    ));

    // The live group is untouched.
    data.set_length(3, 1.0).expect("still usable");
    assert_converged(&group, &data);
}

#[test]
fn test_remove_stale_is_explicit() {
    init_tracing();
    let config = GroupConfig::new(unique_prefix("stale")).with_workers(1);
    let Ok(leftover) = ControlBlock::create(&config.segment_prefix) else {
        eprintln!("skipping shmem test (not available)");
        return;
    };
    std::mem::forget(leftover);

    assert!(matches!(
        Group::spawn(config.clone()),
        Err(ArrayError::Allocation(_))
    ));
    assert!(Group::remove_stale(&config).expect("remove"));
    assert!(!Group::remove_stale(&config).expect("nothing left"));

    let group = Group::spawn(config).expect("spawn after cleanup");
    let data = group.create_data::<u8>(1).expect("create");
    assert_converged(&group, &data);
}
