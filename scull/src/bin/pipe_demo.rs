//! Pipe CLI Demo
//!
//! Lines typed on stdin go into `scullpipe0`; three readers compete for the
//! bytes. The ring is kept small so that the writer has to wait for the
//! readers. An empty line quits.

use scull::{Caller, DeviceError, Driver, DriverConfig, OpenFlags, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = DriverConfig {
        pipe_buffer: 8,
        ..DriverConfig::default()
    };
    let driver = Driver::load(config)?;

    let readers = Caller::user(1000);
    let mut reader_tasks = Vec::new();
    for name in ["r1", "r2", "r3"] {
        let session = driver
            .open("scullpipe0", &readers, OpenFlags::read_only())
            .await?;
        reader_tasks.push(tokio::spawn(async move {
            read_all(name, session).await;
        }));
    }

    let writer = driver
        .open("scullpipe0", &Caller::user(1000), OpenFlags::write_only())
        .await?;
    write_lines(writer).await?;

    // A pipe has no end-of-file: readers sleep until interrupted
    readers.interrupt.raise();
    for task in reader_tasks {
        let _ = task.await;
    }

    driver.unload().await;
    println!("All tasks completed");
    Ok(())
}

async fn write_lines(mut writer: Session) -> Result<(), DeviceError> {
    println!("Enter text (empty line to quit):");

    let stdin = tokio::io::stdin();
    let reader = tokio::io::BufReader::new(stdin);
    let mut lines = tokio::io::AsyncBufReadExt::lines(reader);

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        writer.write_all(trimmed.as_bytes()).await?;
    }

    // Let the readers drain the ring before they are stopped
    while writer.poll().await?.readable {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    writer.close()?;
    println!("Writer closed");
    Ok(())
}

async fn read_all(name: &str, mut reader: Session) {
    let mut buf = [0u8; 4];

    loop {
        match reader.read(&mut buf).await {
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                println!("({name}) read {n} bytes: {text:?}");
            }
            Err(DeviceError::Interrupted) => {
                println!("({name}) interrupted");
                break;
            }
            Err(e) => {
                eprintln!("({name}) read error: {e} (errno={})", e.errno());
                break;
            }
        }
    }
}
