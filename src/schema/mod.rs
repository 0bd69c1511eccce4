//! Static schema descriptors.
//!
//! Each entity type registers a [`ModelSchema`] once at startup; the field
//! inventory (scalar fields, foreign keys, many-to-many sets) is computed at
//! that point and never mutated afterward. The filter compiler and the
//! projection layer look field types up here instead of reflecting over a
//! live object model.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// Backing column type buckets. The compiler only distinguishes character,
/// numeric and temporal semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Char,
    Int,
    Float,
    Decimal,
    Bool,
    Date,
    DateTime,
    Time,
}

impl FieldKind {
    pub fn is_character(&self) -> bool {
        matches!(self, FieldKind::Char)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Int | FieldKind::Float | FieldKind::Decimal | FieldKind::Bool
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldKind::Date | FieldKind::DateTime | FieldKind::Time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub kind: RelationKind,
    /// Schema name of the related model
    pub model: &'static str,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub blankable: bool,
    pub has_default: bool,
    pub primary_key: bool,
    pub relation: Option<Relation>,
}

impl FieldDef {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            blankable: false,
            has_default: false,
            primary_key: false,
            relation: None,
        }
    }

    pub fn pk(name: &'static str) -> Self {
        let mut f = Self::new(name, FieldKind::Int);
        f.primary_key = true;
        f.has_default = true;
        f
    }

    pub fn fk(name: &'static str, model: &'static str) -> Self {
        let mut f = Self::new(name, FieldKind::Int);
        f.relation = Some(Relation {
            kind: RelationKind::ManyToOne,
            model,
        });
        f
    }

    pub fn m2m(name: &'static str, model: &'static str) -> Self {
        let mut f = Self::new(name, FieldKind::Int);
        f.relation = Some(Relation {
            kind: RelationKind::ManyToMany,
            model,
        });
        f
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn blankable(mut self) -> Self {
        self.blankable = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// Immutable per-model field inventory, computed once at registration.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub name: &'static str,
    pub table: &'static str,
    defs: Vec<FieldDef>,
    /// Non-relational fields plus `<fk>_id` names
    pub fields: Vec<String>,
    pub fk_fields: Vec<String>,
    pub m2m_fields: Vec<String>,
    /// Local fields + m2m fields
    pub all_fields: Vec<String>,
}

impl ModelSchema {
    pub fn new(name: &'static str, table: &'static str, defs: Vec<FieldDef>) -> Self {
        let mut fields = Vec::new();
        let mut fk_fields = Vec::new();
        let mut m2m_fields = Vec::new();
        let mut local = Vec::new();

        for def in &defs {
            match &def.relation {
                None => {
                    fields.push(def.name.to_string());
                    local.push(def.name.to_string());
                }
                Some(rel) if rel.kind == RelationKind::ManyToOne => {
                    fk_fields.push(def.name.to_string());
                    fields.push(format!("{}_id", def.name));
                    local.push(def.name.to_string());
                }
                Some(_) => {
                    m2m_fields.push(def.name.to_string());
                }
            }
        }

        let mut all_fields = local;
        all_fields.extend(m2m_fields.iter().cloned());

        Self {
            name,
            table,
            defs,
            fields,
            fk_fields,
            m2m_fields,
            all_fields,
        }
    }

    pub fn defs(&self) -> &[FieldDef] {
        &self.defs
    }

    /// Looks up a direct field. `<name>_id` aliases resolve to the foreign
    /// key field they belong to.
    pub fn field(&self, name: &str) -> Result<&FieldDef, SchemaError> {
        let base = name.strip_suffix("_id").filter(|b| {
            self.defs
                .iter()
                .any(|d| d.name == *b && d.relation.is_some())
        });
        let lookup = base.unwrap_or(name);
        self.defs
            .iter()
            .find(|d| d.name == lookup)
            .ok_or_else(|| SchemaError::UnknownField(format!("{}.{}", self.name, name)))
    }

    pub fn is_fk(&self, name: &str) -> bool {
        self.fk_fields.iter().any(|f| f == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.all_fields.iter().any(|f| f == name) || self.fields.iter().any(|f| f == name)
    }

    pub fn primary_key(&self) -> &FieldDef {
        // Registry construction guarantees exactly one pk
        self.defs
            .iter()
            .find(|d| d.primary_key)
            .expect("model registered without a primary key")
    }
}

/// Process-wide set of model schemas. Built once at startup; a malformed
/// model description is a startup-time fatal error, not a per-request one.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<&'static str, ModelSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ModelSchema) {
        let mut seen = std::collections::HashSet::new();
        for def in schema.defs() {
            if !seen.insert(def.name) {
                panic!("model {} declares field {} twice", schema.name, def.name);
            }
        }
        if !schema.defs().iter().any(|d| d.primary_key) {
            panic!("model {} has no primary key", schema.name);
        }
        self.models.insert(schema.name, schema);
    }

    pub fn validate(&self) {
        // Relations must point at registered models
        for schema in self.models.values() {
            for def in schema.defs() {
                if let Some(rel) = &def.relation {
                    if !self.models.contains_key(rel.model) {
                        panic!(
                            "model {} field {} relates to unknown model {}",
                            schema.name, def.name, rel.model
                        );
                    }
                }
            }
        }
    }

    pub fn model(&self, name: &str) -> Result<&ModelSchema, SchemaError> {
        self.models
            .get(name)
            .ok_or_else(|| SchemaError::UnknownModel(name.to_string()))
    }

    /// Resolves `field` or `relation__field` against `model`, walking at
    /// most one relation hop.
    pub fn resolve_path<'a>(
        &'a self,
        model: &ModelSchema,
        path: &str,
    ) -> Result<&'a FieldDef, SchemaError> {
        match path.split_once("__") {
            None => {
                let owned = self.model(model.name)?;
                owned.field(path)
            }
            Some((rel, field)) => {
                let rel_def = self.model(model.name)?.field(rel)?;
                let related = rel_def
                    .relation
                    .as_ref()
                    .ok_or_else(|| SchemaError::UnknownField(path.to_string()))?;
                self.model(related.model)?.field(field)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_schema() -> ModelSchema {
        ModelSchema::new(
            "contact",
            "contacts",
            vec![
                FieldDef::pk("id"),
                FieldDef::new("name", FieldKind::Char),
                FieldDef::new("email", FieldKind::Char).blankable(),
                FieldDef::new("birthdate", FieldKind::Date).nullable(),
                FieldDef::fk("owner", "user"),
                FieldDef::m2m("tags", "tag"),
            ],
        )
    }

    #[test]
    fn inventories_split_relational_fields() {
        let schema = contact_schema();
        assert_eq!(schema.fields, ["id", "name", "email", "birthdate", "owner_id"]);
        assert_eq!(schema.fk_fields, ["owner"]);
        assert_eq!(schema.m2m_fields, ["tags"]);
        assert_eq!(
            schema.all_fields,
            ["id", "name", "email", "birthdate", "owner", "tags"]
        );
    }

    #[test]
    fn fk_id_alias_resolves() {
        let schema = contact_schema();
        assert!(schema.field("owner_id").is_ok());
        assert!(schema.field("owner").is_ok());
        assert!(schema.field("nope").is_err());
    }

    #[test]
    fn resolve_dotted_path() {
        let mut registry = SchemaRegistry::new();
        registry.register(contact_schema());
        registry.register(ModelSchema::new(
            "user",
            "users",
            vec![FieldDef::pk("id"), FieldDef::new("email", FieldKind::Char)],
        ));
        registry.register(ModelSchema::new(
            "tag",
            "tags",
            vec![FieldDef::pk("id"), FieldDef::new("name", FieldKind::Char)],
        ));
        registry.validate();

        let contact = registry.model("contact").unwrap();
        let field = registry.resolve_path(contact, "owner__email").unwrap();
        assert_eq!(field.name, "email");
        assert!(registry.resolve_path(contact, "owner__missing").is_err());
    }

    #[test]
    #[should_panic]
    fn duplicate_field_is_fatal() {
        let mut registry = SchemaRegistry::new();
        registry.register(ModelSchema::new(
            "broken",
            "broken",
            vec![FieldDef::pk("id"), FieldDef::new("id", FieldKind::Char)],
        ));
    }
}
