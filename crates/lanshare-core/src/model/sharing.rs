//! worker 进程私有的共享表
//!
//! 只被 worker 的命令循环写入，请求处理只读（浏览计数除外）。

use std::collections::HashMap;

use super::entity::{Entry, ShareEntity, UUID_SEPARATOR};

#[derive(Debug, Default)]
pub struct SharingModel {
    shares: HashMap<String, ShareEntity>,
}

impl SharingModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入共享；相同 uuid 的旧记录会被替换并返回
    pub fn insert(&mut self, entity: ShareEntity) -> Option<ShareEntity> {
        self.shares.insert(entity.uuid().to_string(), entity)
    }

    pub fn remove(&mut self, uuid: &str) -> Option<ShareEntity> {
        self.shares.remove(uuid)
    }

    pub fn get(&self, uuid: &str) -> Option<&ShareEntity> {
        self.shares.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut ShareEntity> {
        self.shares.get_mut(uuid)
    }

    /// 解析可能是组合形式的 uuid (`root>child>...`)
    pub fn resolve(&self, uuid: &str) -> Option<Entry<'_>> {
        let root = uuid.split(UUID_SEPARATOR).next()?;
        self.shares.get(root)?.resolve(uuid)
    }

    /// 组合 uuid 所属的根共享
    pub fn root_of_mut(&mut self, uuid: &str) -> Option<&mut ShareEntity> {
        let root = uuid.split(UUID_SEPARATOR).next()?;
        self.shares.get_mut(root)
    }

    pub fn values(&self) -> impl Iterator<Item = &ShareEntity> {
        self.shares.values()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShareType;

    #[test]
    fn test_resolve_through_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let entity = ShareEntity::new(dir.path(), ShareType::Http, None, None).unwrap();
        let child_uuid = entity.root().children().next().unwrap().uuid().to_string();
        let root_uuid = entity.uuid().to_string();

        let mut model = SharingModel::new();
        assert!(model.insert(entity).is_none());

        assert_eq!(model.resolve(&child_uuid).unwrap().file_name(), "a.txt");
        assert!(model.resolve(&root_uuid).unwrap().is_dir());
        assert!(model.resolve("hunknown").is_none());

        model.root_of_mut(&child_uuid).unwrap().browse_number += 1;
        assert_eq!(model.get(&root_uuid).unwrap().browse_number, 1);

        assert!(model.remove(&root_uuid).is_some());
        assert!(model.is_empty());
    }
}
