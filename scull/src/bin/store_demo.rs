//! Store demo
//!
//! Writes a sentence into `scull0` with small segments, prints how the
//! chain was laid out, then changes the segment size through a control
//! command and shows that the next write-only open picks it up.
//!
//! Usage: `store_demo [config.toml]`; set `RUST_LOG=debug` for events.

use scull::control::{SCULL_IOCHQUANTUM, SCULL_IOCQQUANTUM};
use scull::{Binding, Caller, ControlArg, Driver, DriverConfig, OpenFlags, Session, Whence};
use tracing_subscriber::EnvFilter;

const TEXT: &[u8] = b"The quick brown fox jumps over the lazy dog";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig {
            segment_size: 8,
            set_size: 4,
            ..DriverConfig::default()
        },
    };
    let driver = Driver::load(config)?;
    println!("devices: {}", driver.device_names().join(" "));

    let root = Caller::root();
    let mut session = driver.open("scull0", &root, OpenFlags::read_write()).await?;
    session.write_all(TEXT).await?;
    print_layout(&session).await;

    session.seek(4, Whence::Start).await?;
    let mut buf = [0u8; 16];
    let n = session.read(&mut buf).await?;
    println!("read at 4: {:?}", String::from_utf8_lossy(&buf[..n]));

    let old = session.control(SCULL_IOCHQUANTUM, ControlArg::Value(16))?;
    let new = session.control(SCULL_IOCQQUANTUM, ControlArg::None)?;
    println!("segment size: {old} -> {new}");
    session.close()?;

    let mut session = driver.open("scull0", &root, OpenFlags::write_only()).await?;
    session.write_all(TEXT).await?;
    print_layout(&session).await;
    session.close()?;

    driver.unload().await;
    Ok(())
}

async fn print_layout(session: &Session) {
    let Binding::Store(store) = session.binding() else {
        return;
    };
    let layout = store.layout().await;
    println!(
        "size {} bytes, segment {}, set {}, {} segments",
        layout.size,
        layout.segment_size,
        layout.set_size,
        layout.segment_count()
    );
    for (i, set) in layout.sets.iter().enumerate() {
        println!("  set {i}: {} slots, allocated {:?}", set.slots, set.segments);
    }
}
