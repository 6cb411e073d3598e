use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::Result;
use kernjit::cache::{CacheKey, CacheStore, CompileEnv, Lookup, build_key, ensure_dir};
use kernjit::{Arch, Backend, CompileOptions, CompilerVersion};

fn temp_cache_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("kernjit-cache-test")
        .tempdir()
        .expect("failed to create temp dir")
}

fn key_for(source: &str) -> CacheKey {
    let env = CompileEnv {
        arch: Arch::new(80),
        options: CompileOptions::new().with("-ftz=true"),
        compiler_version: CompilerVersion::new(12, 1),
        backend: Backend::ExternalTool,
    };
    build_key(&env, "baseline", source, None)
}

fn hit(lookup: Lookup) -> Option<Vec<u8>> {
    match lookup {
        Lookup::Hit(payload) => Some(payload),
        Lookup::Miss => None,
    }
}

#[test]
fn store_round_trips_payload() -> Result<()> {
    let dir = temp_cache_dir();
    let store = CacheStore::new(dir.path().join("kernel_cache"));
    let key = key_for("extern \"C\" __global__ void k() {}");

    assert!(hit(store.read(&key)?).is_none());
    let path = store.write(&key, b"\x7fELF fake cubin", None)?;
    assert_eq!(path, store.entry_path(&key));
    assert_eq!(hit(store.read(&key)?).as_deref(), Some(&b"\x7fELF fake cubin"[..]));
    Ok(())
}

#[test]
fn any_single_byte_corruption_is_a_miss() -> Result<()> {
    let dir = temp_cache_dir();
    let store = CacheStore::new(dir.path());
    let key = key_for("k");
    store.write(&key, b"0123456789abcdef0123456789abcdef", None)?;
    let path = store.entry_path(&key);
    let pristine = fs::read(&path)?;

    for index in 0..pristine.len() {
        let mut corrupted = pristine.clone();
        corrupted[index] ^= 0xff;
        fs::write(&path, &corrupted)?;
        assert!(
            hit(store.read(&key)?).is_none(),
            "flipping byte {index} went unnoticed"
        );
    }
    Ok(())
}

#[test]
fn truncated_entries_are_misses() -> Result<()> {
    let dir = temp_cache_dir();
    let store = CacheStore::new(dir.path());
    let key = key_for("k");
    store.write(&key, b"payload bytes", None)?;
    let path = store.entry_path(&key);
    let pristine = fs::read(&path)?;

    for len in [0, 1, 39, 40, pristine.len() - 1] {
        fs::write(&path, &pristine[..len])?;
        assert!(hit(store.read(&key)?).is_none(), "length {len} was accepted");
    }
    Ok(())
}

#[test]
fn recompiled_entry_replaces_corrupted_one() -> Result<()> {
    let dir = temp_cache_dir();
    let store = CacheStore::new(dir.path());
    let key = key_for("k");
    fs::write(store.entry_path(&key), b"garbage")?;

    assert!(hit(store.read(&key)?).is_none());
    store.write(&key, b"fresh", None)?;
    assert_eq!(hit(store.read(&key)?).as_deref(), Some(&b"fresh"[..]));
    Ok(())
}

#[test]
fn readers_never_observe_partial_entries() -> Result<()> {
    let dir = temp_cache_dir();
    let store = Arc::new(CacheStore::new(dir.path().join("shared")));
    let key = key_for("contended kernel");
    let payloads: Vec<Vec<u8>> = (0..4u8).map(|n| vec![n; 64 * 1024]).collect();
    let known: HashSet<Vec<u8>> = payloads.iter().cloned().collect();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let store = Arc::clone(&store);
        let key = key.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<usize> {
            let mut hits = 0;
            while !done.load(Ordering::SeqCst) {
                if let Some(payload) = hit(store.read(&key)?) {
                    assert!(known.contains(&payload), "read a torn entry");
                    hits += 1;
                }
            }
            Ok(hits)
        })
    };

    let writers: Vec<_> = payloads
        .into_iter()
        .map(|payload| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || -> Result<()> {
                for _ in 0..25 {
                    store.write(&key, &payload, None)?;
                }
                Ok(())
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer panicked")?;
    }
    done.store(true, Ordering::SeqCst);
    reader.join().expect("reader panicked")?;

    assert!(store.read(&key)?.is_hit());
    let stray: Vec<_> = fs::read_dir(store.dir())?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".staged-"))
        .collect();
    assert!(stray.is_empty());
    Ok(())
}

#[test]
fn racing_directory_creation_succeeds() -> Result<()> {
    let root = temp_cache_dir();
    let dir = root.path().join("a").join("b").join("kernel_cache");

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| ensure_dir(&dir))).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect()
    });

    for result in results {
        result?;
    }
    assert!(dir.is_dir());
    Ok(())
}

#[test]
fn source_side_file_follows_setting() -> Result<()> {
    let dir = temp_cache_dir();
    let key = key_for("k");

    let quiet = CacheStore::new(dir.path().join("quiet"));
    quiet.write(&key, b"bin", Some("kernel source"))?;
    assert!(!quiet.source_path(&key).exists());

    let saving = CacheStore::new(dir.path().join("saving")).with_save_source(true);
    saving.write(&key, b"bin", Some("kernel source"))?;
    let side = saving.source_path(&key);
    assert!(side.to_string_lossy().ends_with("_2.cubin.cu"));
    assert_eq!(fs::read_to_string(side)?, "kernel source");
    Ok(())
}

#[test]
fn unwritable_side_source_does_not_fail_the_entry() -> Result<()> {
    let dir = temp_cache_dir();
    let store = CacheStore::new(dir.path()).with_save_source(true);
    let key = key_for("k");
    let side = store.source_path(&key);
    fs::create_dir_all(&side)?;

    store.write(&key, b"bin", Some("kernel source"))?;

    assert_eq!(hit(store.read(&key)?).as_deref(), Some(&b"bin"[..]));
    assert!(side.is_dir());
    Ok(())
}

#[test]
fn entry_names_are_content_addressed() {
    let store = CacheStore::new("/var/cache/kernjit");
    let key = key_for("k");
    let path = store.entry_path(&key);
    let name = path.file_name().unwrap().to_string_lossy().into_owned();

    assert_eq!(name, format!("{key}_2.cubin"));
    assert_eq!(key.as_str().len(), 40);
    assert_ne!(key, key_for("k2"));
}
