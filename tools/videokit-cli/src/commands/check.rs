//! Check system capabilities.

use videokit_common::config::AppConfig;
use videokit_transcode_engine::binary_available;

pub async fn run(app: &AppConfig) -> anyhow::Result<()> {
    println!("VideoKit System Check");
    println!("{}", "=".repeat(50));

    let tools = [
        ("ffmpeg", &app.engine.ffmpeg_bin),
        ("ffprobe", &app.engine.ffprobe_bin),
    ];
    let mut all_ok = true;
    for (name, bin) in tools {
        if binary_available(bin).await {
            println!("[OK] {name}: {}", bin.display());
        } else {
            all_ok = false;
            println!("[MISSING] {name}: {} (install FFmpeg 7 or newer)", bin.display());
        }
    }

    println!();
    println!("Output directory: {}", app.output_dir().display());
    println!(
        "Intermediates: {}",
        if app.output.cleanup_intermediates {
            "removed"
        } else {
            "kept"
        }
    );

    println!();
    if all_ok {
        println!("All required tools are available. VideoKit is ready.");
    } else {
        println!("Some required tools are missing. See above for fixes.");
    }

    Ok(())
}
