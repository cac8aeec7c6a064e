//! Print the entries of a RELEASES file, newest last.

use squall_schema::ReleaseManifest;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "releases/RELEASES".to_string());

    let manifest = ReleaseManifest::parse(&std::fs::read_to_string(&path)?)?;
    println!("{path}: {} entries", manifest.len());

    for entry in manifest.sorted() {
        let kind = if entry.is_delta { "delta" } else { "full" };
        println!(
            " - {} {:<5} {:>10} {}",
            entry.version, kind, entry.filesize, entry.filename
        );
    }

    if let Some(latest) = manifest.latest_version() {
        println!("Latest: {latest}");
    } else {
        println!("No releases.");
    }

    Ok(())
}
