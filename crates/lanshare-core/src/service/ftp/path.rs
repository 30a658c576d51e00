//! FTP 虚拟路径
//!
//! 会话看到的路径都以 `/` 为根，对应监听器的 `base_path`。`..` 最多回到
//! 虚拟根目录，无法越出；符号链接解析后的真实路径同样必须位于根目录内。

use std::path::{Path, PathBuf};

/// 基于当前目录解析客户端给出的路径，返回规范化的虚拟绝对路径
pub fn normalize(cwd: &str, input: &str) -> String {
    let input = input.trim();
    let mut parts: Vec<&str> = if input.starts_with('/') || input.starts_with('\\') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in input.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            segment => parts.push(segment),
        }
    }
    format!("/{}", parts.join("/"))
}

/// 虚拟路径对应的真实路径
pub fn to_real(root: &Path, virtual_path: &str) -> PathBuf {
    let mut real = root.to_path_buf();
    for segment in virtual_path.split('/').filter(|s| !s.is_empty()) {
        real.push(segment);
    }
    real
}

/// 解析符号链接后的真实路径，不存在或位于根目录之外时返回 `None`
pub async fn confine(root: &Path, real: &Path) -> Option<PathBuf> {
    let root = tokio::fs::canonicalize(root).await.ok()?;
    let resolved = tokio::fs::canonicalize(real).await.ok()?;
    resolved.starts_with(&root).then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_and_absolute() {
        assert_eq!(normalize("/", "sub"), "/sub");
        assert_eq!(normalize("/sub", "deeper/x.txt"), "/sub/deeper/x.txt");
        assert_eq!(normalize("/sub", "/other"), "/other");
        assert_eq!(normalize("/sub", "./a/../b"), "/sub/b");
        assert_eq!(normalize("/", ""), "/");
    }

    #[test]
    fn test_cannot_escape_root() {
        assert_eq!(normalize("/", ".."), "/");
        assert_eq!(normalize("/a", "../../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize("/", "..\\..\\secret"), "/secret");

        let root = Path::new("/srv/share");
        assert_eq!(
            to_real(root, &normalize("/", "../../etc")),
            Path::new("/srv/share/etc")
        );
        assert_eq!(to_real(root, "/"), root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_confine_rejects_links_leaving_root() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();

        let shared = tempfile::tempdir().unwrap();
        let root = shared.path().join("d");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("a.txt"), b"a").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(root.join("sub"), root.join("alias")).unwrap();

        let escaped = to_real(&root, "/link/secret.txt");
        assert_eq!(confine(&root, &escaped).await, None);
        assert_eq!(confine(&root, &to_real(&root, "/link")).await, None);
        assert_eq!(confine(&root, &to_real(&root, "/missing")).await, None);

        let inside = confine(&root, &to_real(&root, "/alias/a.txt")).await.unwrap();
        assert!(inside.ends_with("sub/a.txt"));
        assert!(confine(&root, &to_real(&root, "/")).await.is_some());
    }
}
