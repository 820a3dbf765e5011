//! Shell-script stand-ins for 7-Zip used by the tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Write an executable `/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

/// A fake archive: a text file with one entry path per line.
///
/// A leading `+` lists the entry as encrypted, a leading `!` lists it but
/// leaves it out on extraction. Paths ending in `/` are folders.
pub fn write_fake_archive(dir: &Path, name: &str, entries: &[&str]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut body = entries.join("\n");
    body.push('\n');
    fs::write(&path, body)?;
    Ok(path)
}

const FAKE_SEVEN_ZIP: &str = r#"mode="$1"
outdir=""
for arg in "$@"; do
  case "$arg" in
    -o*) outdir="${arg#-o}" ;;
  esac
  archive="$arg"
done
read -r _password
if [ "$mode" = "l" ]; then
  echo "7-Zip (fake)"
  echo ""
  echo "Listing archive: $archive"
  echo ""
  echo "--"
  echo "Path = $archive"
  echo "Type = zip"
  echo ""
  echo "----------"
  while IFS= read -r entry; do
    enc="-"
    case "$entry" in
      +*) entry="${entry#+}"; enc="+" ;;
      !*) entry="${entry#!}" ;;
    esac
    case "$entry" in
      */) printf 'Path = %s\nFolder = +\nSize = 0\nAttributes = D\nEncrypted = -\n\n' "$entry" ;;
      *) printf 'Path = %s\nFolder = -\nSize = 4\nAttributes = A\nEncrypted = %s\n\n' "$entry" "$enc" ;;
    esac
  done < "$archive"
else
  echo "Extracting archive: $archive"
  while IFS= read -r entry; do
    case "$entry" in
      +*|!*) ;;
      */) mkdir -p "$outdir/$entry" ;;
      *) mkdir -p "$outdir/$(dirname "$entry")"; printf 'data' > "$outdir/$entry" ;;
    esac
  done < "$archive"
  echo ""
  echo "Everything is Ok"
fi
"#;

/// A script that answers `l` and `x` for archives made by
/// [`write_fake_archive`]. Every file is 4 bytes.
pub fn fake_seven_zip(dir: &Path) -> Result<PathBuf> {
    write_script(dir, "fake7z", FAKE_SEVEN_ZIP)
}
