//! Tag-list synchronization.
//!
//! Tags are identified by (context, name); submitting an entity's tag list
//! diffs it against the stored associations and applies only the delta.

use crate::store::{StoreError, TagStore};

/// Reconciles the entity's tag links with `submitted`, returning the final
/// tag name list for the response payload.
pub async fn sync_tags(
    store: &dyn TagStore,
    model: &str,
    entity: i64,
    context: i64,
    submitted: &[String],
) -> Result<Vec<String>, StoreError> {
    let mut wanted = Vec::with_capacity(submitted.len());
    for name in submitted {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id = store.get_or_create(context, trimmed).await?;
        if !wanted.contains(&id) {
            wanted.push(id);
        }
    }

    let existing = store.tag_ids_for(model, entity).await?;
    let removed: Vec<i64> = existing
        .iter()
        .copied()
        .filter(|id| !wanted.contains(id))
        .collect();
    let added: Vec<i64> = wanted
        .iter()
        .copied()
        .filter(|id| !existing.contains(id))
        .collect();

    if !removed.is_empty() {
        store.unlink(model, entity, &removed).await?;
    }
    if !added.is_empty() {
        store.link(model, entity, &added).await?;
    }
    store.tag_names_for(model, entity).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::tenant::{with_binding, ConnectionDescriptor};
    use crate::store::Backend;

    #[tokio::test]
    async fn sync_applies_only_the_delta() {
        let backend = MemoryBackend::new();
        let binding = ConnectionDescriptor::fixed("t");
        with_binding(binding, async {
            let tags = backend.tags();
            // Start with hot + cold
            sync_tags(tags, "thing", 1, 9, &["hot".to_string(), "cold".to_string()])
                .await
                .unwrap();
            let before = tags.tag_ids_for("thing", 1).await.unwrap();
            assert_eq!(before.len(), 2);

            // Replace cold with new; hot's link must survive untouched
            let names = sync_tags(tags, "thing", 1, 9, &["hot".to_string(), "new".to_string()])
                .await
                .unwrap();
            assert!(names.contains(&"hot".to_string()));
            assert!(names.contains(&"new".to_string()));
            assert!(!names.contains(&"cold".to_string()));

            let after = tags.tag_ids_for("thing", 1).await.unwrap();
            assert!(after.contains(&before[0]));
        })
        .await;
    }

    #[tokio::test]
    async fn contexts_do_not_share_tag_identity() {
        let backend = MemoryBackend::new();
        let binding = ConnectionDescriptor::fixed("t");
        with_binding(binding, async {
            let tags = backend.tags();
            sync_tags(tags, "thing", 1, 1, &["hot".to_string()]).await.unwrap();
            sync_tags(tags, "thing", 2, 2, &["hot".to_string()]).await.unwrap();
            let a = tags.tag_ids_for("thing", 1).await.unwrap();
            let b = tags.tag_ids_for("thing", 2).await.unwrap();
            assert_ne!(a, b);
        })
        .await;
    }
}
