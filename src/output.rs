// src/output.rs
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Write via a sibling tmp file then rename, so a reader never sees a
/// half-written dump. Rename can fail across filesystems; fall back to
/// a direct write.
fn write_atomic(path: &Path, data: &str) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).ok();
        }
    }
    let mut tmp = path.to_path_buf();
    let ext = tmp.extension().and_then(|e| e.to_str()).unwrap_or("json");
    tmp.set_extension(format!("{ext}.partial"));

    fs::write(&tmp, data).with_context(|| format!("write tmp dump {tmp:?}"))?;
    if fs::rename(&tmp, path).is_err() {
        fs::write(path, data).with_context(|| format!("write dump {path:?}"))?;
        let _ = fs::remove_file(&tmp);
    }
    log::info!("wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

/// Full-depth dump at session end: one generic file plus one suffixed
/// with the session's symbol.
pub fn write_final_books(dir: &Path, book_json: &str, symbol: &str) {
    if let Err(e) = write_atomic(&dir.join("final_book.json"), book_json) {
        log::warn!("final dump failed: {e:#}");
    }
    if !symbol.is_empty() {
        if let Err(e) = write_atomic(&dir.join(format!("final_book_{symbol}.json")), book_json) {
            log::warn!("final dump failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn writes_generic_and_symbol_suffixed_dumps() {
        let dir = std::env::temp_dir().join(format!("final_books_{}", process::id()));
        let _ = fs::remove_dir_all(&dir);

        write_final_books(&dir, "{\"bids\":[],\"asks\":[]}", "CLX5");
        let generic = fs::read_to_string(dir.join("final_book.json")).unwrap();
        let suffixed = fs::read_to_string(dir.join("final_book_CLX5.json")).unwrap();
        assert_eq!(generic, "{\"bids\":[],\"asks\":[]}");
        assert_eq!(generic, suffixed);
        // no tmp leftovers
        assert!(!dir.join("final_book.json.partial").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_symbol_writes_only_generic_dump() {
        let dir = std::env::temp_dir().join(format!("final_books_nosym_{}", process::id()));
        let _ = fs::remove_dir_all(&dir);

        write_final_books(&dir, "{}", "");
        assert!(dir.join("final_book.json").exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        let _ = fs::remove_dir_all(&dir);
    }
}
