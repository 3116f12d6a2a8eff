//! Map file commands.

use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use console::style;
use serde::Deserialize;

use spanlookup::config::LoadingMode;
use spanlookup::store::{MapFile, MapFileWriter};
use spanlookup::FeatureValue;

#[derive(Deserialize)]
struct Entry {
    key: String,
    value: serde_json::Value,
}

fn parse_entry(line: &str, plain: bool) -> anyhow::Result<(String, FeatureValue)> {
    let entry: Entry = serde_json::from_str(line)?;
    let value = if plain {
        FeatureValue::from(entry.value)
    } else {
        serde_json::from_value(entry.value)?
    };
    Ok((entry.key, value))
}

/// Import JSON lines into a map.
pub fn cmd_import(file: &Path, input: &Path, map: &str, plain: bool) -> anyhow::Result<()> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let f = std::fs::File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        Box::new(BufReader::new(f))
    };

    let mut entries = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_entry(&line, plain)
            .with_context(|| format!("{}:{}: invalid entry", input.display(), n + 1))?;
        entries.push(entry);
    }

    let mut writer = MapFileWriter::create(file, map)?;
    let count = writer.insert_all(entries)?;
    println!(
        "{} Imported {} entries into map '{}' of {}",
        style("✓").green(),
        count,
        map,
        file.display()
    );
    Ok(())
}

/// Print the value stored for `key`.
pub fn cmd_get(file: &Path, map: &str, key: &str, json: bool) -> anyhow::Result<()> {
    let map_file = MapFile::open(file, map, LoadingMode::FileOnly)?;
    match map_file.get(key)? {
        Some(value) if json => println!("{}", serde_json::to_string(&value)?),
        Some(value) => println!("{}", value),
        None => {
            println!("{} No entry for '{}'", style("✗").red(), key);
            std::process::exit(1);
        }
    }
    Ok(())
}
