//! Grow a shared array on the master and read it back from every worker.
//!
//! Run with `RUST_LOG=debug cargo run --example grow_and_share` to see each
//! allocation, reshape and worker attach.

use tandem_array::{Group, GroupConfig, HostArray, Result};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let group = Group::spawn(GroupConfig::default().with_workers(4))?;
    let mut data = group.create_data_with::<f64>(2, Some("samples".to_string()), true)?;

    // Integers up-cast to f64; the allocation gets 50% headroom.
    let input = HostArray::new(&[2, 3], vec![1i32, 2, 3, 4, 5, 6])?;
    data.set_value(&input, false, 1.5)?;
    info!(
        "shape {:?}, alloc_size {}, tag {}",
        data.shape(),
        data.alloc_size(),
        data.tag()
    );

    // Fits in the headroom: reshape only, same segment.
    data.set_length(3, 1.5)?;
    info!("shape {:?}, tag {}", data.shape(), data.tag());

    // Workers 0..3 each add their rank to one cell of row 2.
    let id = data.id();
    group.channel(|pool| {
        pool.visit(move |rank, mirror| {
            let mut view = mirror.view_mut::<f64>(id)?;
            if let Some(cell) = view.get_mut(&[2, rank]) {
                *cell += rank as f64;
            }
            Ok(())
        })
    })?;
    info!("after workers: {:?}", data.as_slice());

    // Too big for the headroom: new segment under the next tag.
    data.set_shape(&[10, 10], 1.0)?;
    info!(
        "shape {:?}, alloc_size {}, tag {}",
        data.shape(),
        data.alloc_size(),
        data.tag()
    );

    data.free_memory()?;
    info!("freed, alloc_size {}", data.alloc_size());
    Ok(())
}
