//! String store commands.

use console::style;

use spanlookup::store::{open_connection, StringStore, StringStoreSettings};

use super::StoreTarget;

fn open_store(target: &StoreTarget, read_only: bool) -> anyhow::Result<StringStore> {
    let conn = open_connection(&target.db)?;
    let settings = StringStoreSettings {
        table: target.table.clone(),
        key_column: target.key_column.clone(),
        value_column: target.value_column.clone(),
        read_only,
    };
    Ok(StringStore::open(conn, &settings)?)
}

pub fn cmd_get(target: &StoreTarget, key: &str) -> anyhow::Result<()> {
    match open_store(target, true)?.get(key)? {
        Some(value) => println!("{}", value),
        None => {
            eprintln!("{} No value for '{}'", style("✗").red(), key);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub fn cmd_contains(target: &StoreTarget, key: &str) -> anyhow::Result<()> {
    if !open_store(target, true)?.contains(key)? {
        std::process::exit(1);
    }
    Ok(())
}

pub fn cmd_put(target: &StoreTarget, key: &str, value: &str) -> anyhow::Result<()> {
    open_store(target, false)?.put(key, value)?;
    println!("{} Stored '{}'", style("✓").green(), key);
    Ok(())
}

pub fn cmd_remove(target: &StoreTarget, keys: &[String]) -> anyhow::Result<()> {
    open_store(target, false)?.remove_all(keys)?;
    println!("{} Removed {} key(s)", style("✓").green(), keys.len());
    Ok(())
}
