//! Import pasted caption JSON.

use std::io::Read;
use std::path::PathBuf;

use subgenius_caption_codec::{export_json, import_json};
use subgenius_caption_model::time::format_clock;
use subgenius_caption_model::CaptionList;

pub fn run(input: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = if input.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&input)?
    };

    // All-or-nothing: a malformed document imports nothing.
    let captions = CaptionList::from_records(
        import_json(&raw).map_err(|e| anyhow::anyhow!("Import failed: {e}"))?,
    );
    let json = export_json(captions.records())?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("Imported {} caption(s) into {}", captions.len(), path.display());
            for caption in &captions {
                eprintln!(
                    "  {} -> {}  {}",
                    format_clock(caption.start_time),
                    format_clock(caption.end_time),
                    caption.text.replace('\n', " / ")
                );
            }
        }
        None => println!("{json}"),
    }
    Ok(())
}
