//! Document model: the space system tree and the lookup indices built over it.
//!
//! A [Database] is constructed once from a root [SpaceSystem]. All indices are built up
//! front, so lookups never mutate the database and it can be shared across threads.
mod definition;
mod encoding;
pub mod path;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

pub use definition::*;
pub use encoding::*;

use crate::time::TimeHandlers;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ItemKind {
    Parameter,
    Argument,
}

/// A parameter, command argument, or aggregate member with its resolved type.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    name: String,
    path: String,
    kind: ItemKind,
    ty: ItemType,
    initial_value: Option<String>,
    members: Vec<Item>,
}

impl Item {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path. Aggregate members append `.<member>` to their parent's path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    #[must_use]
    pub fn item_type(&self) -> &ItemType {
        &self.ty
    }

    /// Initial calibrated value of a command argument.
    #[must_use]
    pub fn initial_value(&self) -> Option<&str> {
        self.initial_value.as_deref()
    }

    /// Resolved aggregate members, empty for non-aggregates.
    #[must_use]
    pub fn members(&self) -> &[Item] {
        &self.members
    }
}

/// A sequence container and the space system it was defined in.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    path: String,
    space_system: String,
    def: SequenceContainer,
}

impl Container {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the owning space system, the context for relative references.
    #[must_use]
    pub fn space_system(&self) -> &str {
        &self.space_system
    }

    #[must_use]
    pub fn definition(&self) -> &SequenceContainer {
        &self.def
    }
}

/// A meta-command with its resolved arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Telecommand {
    path: String,
    space_system: String,
    def: MetaCommand,
    arguments: Vec<Item>,
}

impl Telecommand {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn space_system(&self) -> &str {
        &self.space_system
    }

    #[must_use]
    pub fn definition(&self) -> &MetaCommand {
        &self.def
    }

    /// Arguments declared directly on this command, excluding inherited ones.
    #[must_use]
    pub fn arguments(&self) -> &[Item] {
        &self.arguments
    }
}

/// Location of an item in [Database::parameters], following member indices for
/// aggregate members.
#[derive(Clone, Debug)]
struct ItemLoc {
    idx: usize,
    members: Vec<usize>,
}

/// Read-only, indexed view of a space system tree.
///
/// # Example
/// ```
/// use xtce::model::{Database, EngineeringType, ItemType, Parameter, SpaceSystem};
///
/// let root = SpaceSystem::builder()
///     .name("Sat")
///     .parameter_types(vec![ItemType::builder()
///         .name("U8")
///         .engineering_type(EngineeringType::Unsigned)
///         .size_in_bits(8)
///         .build()])
///     .parameters(vec![Parameter::builder().name("Mode").type_ref("U8").build()])
///     .build();
/// let db = Database::new(root).unwrap();
/// let mode = db.resolve_parameter("/Sat", "Mode").unwrap();
/// assert_eq!(mode.path(), "/Sat/Mode");
/// ```
#[derive(Debug)]
pub struct Database {
    name: String,
    parameters: Vec<Item>,
    parameter_index: HashMap<String, ItemLoc>,
    containers: Vec<Container>,
    container_index: HashMap<String, usize>,
    telecommands: Vec<Telecommand>,
    telecommand_index: HashMap<String, usize>,
    time_handlers: TimeHandlers,
}

#[derive(Default)]
struct TypeIndex<'a> {
    parameter_types: HashMap<String, &'a ItemType>,
    argument_types: HashMap<String, &'a ItemType>,
}

impl Database {
    /// Index `root` and every space system below it.
    ///
    /// # Errors
    /// [Error::DuplicateDefinition] if two definitions share a path,
    /// [Error::UnresolvedReference] if a type reference cannot be resolved, or
    /// [Error::InvalidDefinition] for recursive aggregate types.
    pub fn new(root: SpaceSystem) -> Result<Self> {
        let mut types = TypeIndex::default();
        index_types(&root, "/", &mut types)?;

        let mut db = Database {
            name: root.name.clone(),
            parameters: Vec::default(),
            parameter_index: HashMap::default(),
            containers: Vec::default(),
            container_index: HashMap::default(),
            telecommands: Vec::default(),
            telecommand_index: HashMap::default(),
            time_handlers: TimeHandlers::default(),
        };
        db.index_space_system(&root, "/", &types)?;
        debug!(
            name = %db.name,
            parameters = db.parameters.len(),
            containers = db.containers.len(),
            telecommands = db.telecommands.len(),
            "indexed database"
        );
        Ok(db)
    }

    /// Parse a JSON encoded [SpaceSystem] tree.
    ///
    /// # Errors
    /// [Error::Json] for invalid JSON, otherwise see [Database::new].
    pub fn from_json(s: &str) -> Result<Self> {
        let root: SpaceSystem = serde_json::from_str(s)?;
        Self::new(root)
    }

    /// Read a JSON encoded [SpaceSystem] tree.
    ///
    /// # Errors
    /// See [Database::from_json].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let root: SpaceSystem = serde_json::from_reader(reader)?;
        Self::new(root)
    }

    /// Read a JSON encoded [SpaceSystem] tree from the file at `path`.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be opened, otherwise see [Database::from_json].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Replace the absolute time handlers used for `Time` items.
    #[must_use]
    pub fn with_time_handlers(mut self, handlers: TimeHandlers) -> Self {
        self.time_handlers = handlers;
        self
    }

    #[must_use]
    pub fn time_handlers(&self) -> &TimeHandlers {
        &self.time_handlers
    }

    /// Name of the root space system.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Top level parameters; aggregate members are reachable through [Item::members].
    pub fn parameters(&self) -> impl Iterator<Item = &Item> {
        self.parameters.iter()
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter()
    }

    pub fn telecommands(&self) -> impl Iterator<Item = &Telecommand> {
        self.telecommands.iter()
    }

    /// Parameter, or aggregate member, with exactly this path.
    #[must_use]
    pub fn parameter(&self, path: &str) -> Option<&Item> {
        let loc = self.parameter_index.get(path)?;
        let mut item = self.parameters.get(loc.idx)?;
        for idx in &loc.members {
            item = item.members.get(*idx)?;
        }
        Some(item)
    }

    #[must_use]
    pub fn container(&self, path: &str) -> Option<&Container> {
        self.container_index
            .get(path)
            .and_then(|idx| self.containers.get(*idx))
    }

    #[must_use]
    pub fn telecommand(&self, path: &str) -> Option<&Telecommand> {
        self.telecommand_index
            .get(path)
            .and_then(|idx| self.telecommands.get(*idx))
    }

    /// Resolve a parameter `reference` made from the space system at `context`.
    ///
    /// # Errors
    /// [Error::UnresolvedReference] if no candidate path exists.
    pub fn resolve_parameter(&self, context: &str, reference: &str) -> Result<&Item> {
        candidates(context, reference)
            .iter()
            .find_map(|p| self.parameter(p))
            .ok_or_else(|| unresolved("parameter", context, reference))
    }

    /// Resolve a container `reference` made from the space system at `context`.
    ///
    /// # Errors
    /// [Error::UnresolvedReference] if no candidate path exists.
    pub fn resolve_container(&self, context: &str, reference: &str) -> Result<&Container> {
        candidates(context, reference)
            .iter()
            .find_map(|p| self.container(p))
            .ok_or_else(|| unresolved("container", context, reference))
    }

    /// Resolve a telecommand `reference` made from the space system at `context`.
    ///
    /// # Errors
    /// [Error::UnresolvedReference] if no candidate path exists.
    pub fn resolve_telecommand(&self, context: &str, reference: &str) -> Result<&Telecommand> {
        candidates(context, reference)
            .iter()
            .find_map(|p| self.telecommand(p))
            .ok_or_else(|| unresolved("telecommand", context, reference))
    }

    /// Find argument `name` on `command` or, failing that, along its base command chain.
    ///
    /// Aggregate members can be addressed as `<argument>.<member>`.
    ///
    /// # Errors
    /// [Error::UnresolvedReference] if no command in the chain declares the argument or a
    /// base command cannot be resolved, [Error::InvalidDefinition] for a cyclic chain.
    pub fn resolve_argument<'a>(
        &'a self,
        command: &'a Telecommand,
        name: &str,
    ) -> Result<&'a Item> {
        let mut current = command;
        let mut visited: Vec<&str> = Vec::new();
        loop {
            if let Some(item) = current.arguments.iter().find_map(|arg| find_member(arg, name)) {
                return Ok(item);
            }
            visited.push(current.path());
            let Some(base) = &current.def.base else {
                return Err(unresolved("argument", command.path(), name));
            };
            current = self.resolve_telecommand(current.space_system(), &base.command_ref)?;
            if visited.contains(&current.path()) {
                return Err(Error::InvalidDefinition(format!(
                    "base command cycle through {}",
                    current.path()
                )));
            }
        }
    }

    fn index_space_system(
        &mut self,
        ss: &SpaceSystem,
        parent: &str,
        types: &TypeIndex,
    ) -> Result<()> {
        let ss_path = path::join(parent, &ss.name);

        for param in &ss.parameters {
            let item_path = path::join(&ss_path, &param.name);
            let type_path = resolve_type(&types.parameter_types, &ss_path, &param.type_ref)?;
            let item = build_item(
                &param.name,
                &item_path,
                ItemKind::Parameter,
                &type_path,
                None,
                &types.parameter_types,
                &mut Vec::new(),
            )?;
            let idx = self.parameters.len();
            self.index_item(&item, ItemLoc { idx, members: vec![] })?;
            self.parameters.push(item);
        }

        for def in &ss.containers {
            let container_path = path::join(&ss_path, &def.name);
            if self.container_index.contains_key(&container_path) {
                return Err(Error::DuplicateDefinition(container_path));
            }
            self.container_index
                .insert(container_path.clone(), self.containers.len());
            self.containers.push(Container {
                path: container_path,
                space_system: ss_path.clone(),
                def: def.clone(),
            });
        }

        for def in &ss.meta_commands {
            let command_path = path::join(&ss_path, &def.name);
            if self.telecommand_index.contains_key(&command_path) {
                return Err(Error::DuplicateDefinition(command_path));
            }
            let mut arguments = Vec::with_capacity(def.arguments.len());
            for arg in &def.arguments {
                let (type_path, type_map) =
                    match resolve_type(&types.argument_types, &ss_path, &arg.type_ref) {
                        Ok(p) => (p, &types.argument_types),
                        // argument types may also be declared as parameter types
                        Err(_) => (
                            resolve_type(&types.parameter_types, &ss_path, &arg.type_ref)?,
                            &types.parameter_types,
                        ),
                    };
                arguments.push(build_item(
                    &arg.name,
                    &path::join(&command_path, &arg.name),
                    ItemKind::Argument,
                    &type_path,
                    arg.initial_value.clone(),
                    type_map,
                    &mut Vec::new(),
                )?);
            }
            self.telecommand_index
                .insert(command_path.clone(), self.telecommands.len());
            self.telecommands.push(Telecommand {
                path: command_path,
                space_system: ss_path.clone(),
                def: def.clone(),
                arguments,
            });
        }

        for child in &ss.space_systems {
            self.index_space_system(child, &ss_path, types)?;
        }
        Ok(())
    }

    fn index_item(&mut self, item: &Item, loc: ItemLoc) -> Result<()> {
        if self.parameter_index.contains_key(item.path()) {
            return Err(Error::DuplicateDefinition(item.path().to_string()));
        }
        for (member_idx, member) in item.members.iter().enumerate() {
            let mut members = loc.members.clone();
            members.push(member_idx);
            self.index_item(member, ItemLoc { idx: loc.idx, members })?;
        }
        self.parameter_index.insert(item.path().to_string(), loc);
        Ok(())
    }
}

fn unresolved(kind: &'static str, context: &str, reference: &str) -> Error {
    Error::UnresolvedReference {
        kind,
        reference: reference.to_string(),
        context: context.to_string(),
    }
}

/// Candidate absolute paths for `reference`, most specific first.
///
/// The reference is tried relative to `context` and then each of its ancestors. If that
/// fails, leading segments of the reference are stripped one at a time and the search is
/// repeated, which recovers from relative references that name the wrong space system.
fn candidates(context: &str, reference: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut reference = reference;
    loop {
        if reference.starts_with(path::SEPARATOR) {
            out.push(path::normalize(reference));
        } else {
            let mut ctx = Some(context);
            while let Some(c) = ctx {
                out.push(path::resolve(c, reference));
                ctx = path::parent(c);
            }
        }
        match reference
            .trim_start_matches(path::SEPARATOR)
            .split_once(path::SEPARATOR)
        {
            Some((_, rest)) if !rest.is_empty() => reference = rest,
            _ => break,
        }
    }
    out.dedup();
    out
}

fn index_types<'a>(ss: &'a SpaceSystem, parent: &str, types: &mut TypeIndex<'a>) -> Result<()> {
    let ss_path = path::join(parent, &ss.name);
    for ty in &ss.parameter_types {
        let p = path::join(&ss_path, &ty.name);
        if types.parameter_types.insert(p.clone(), ty).is_some() {
            return Err(Error::DuplicateDefinition(p));
        }
    }
    for ty in &ss.argument_types {
        let p = path::join(&ss_path, &ty.name);
        if types.argument_types.insert(p.clone(), ty).is_some() {
            return Err(Error::DuplicateDefinition(p));
        }
    }
    for child in &ss.space_systems {
        index_types(child, &ss_path, types)?;
    }
    Ok(())
}

fn resolve_type(
    types: &HashMap<String, &ItemType>,
    context: &str,
    reference: &str,
) -> Result<String> {
    candidates(context, reference)
        .into_iter()
        .find(|p| types.contains_key(p))
        .ok_or_else(|| unresolved("type", context, reference))
}

fn build_item(
    name: &str,
    item_path: &str,
    kind: ItemKind,
    type_path: &str,
    initial_value: Option<String>,
    types: &HashMap<String, &ItemType>,
    visiting: &mut Vec<String>,
) -> Result<Item> {
    if visiting.iter().any(|p| p == type_path) {
        return Err(Error::InvalidDefinition(format!(
            "aggregate type {type_path} contains itself"
        )));
    }
    let ty = types
        .get(type_path)
        .ok_or_else(|| unresolved("type", item_path, type_path))?;

    let mut members = Vec::with_capacity(ty.members.len());
    if ty.is_aggregate() {
        visiting.push(type_path.to_string());
        let type_context = path::parent(type_path).unwrap_or("/");
        for member in &ty.members {
            let member_type = resolve_type(types, type_context, &member.type_ref)?;
            members.push(build_item(
                &format!("{name}.{}", member.name),
                &format!("{item_path}.{}", member.name),
                kind,
                &member_type,
                None,
                types,
                visiting,
            )?);
        }
        visiting.pop();
    }

    Ok(Item {
        name: name.to_string(),
        path: item_path.to_string(),
        kind,
        ty: (*ty).clone(),
        initial_value,
        members,
    })
}

/// `item` itself if named `name`, or the member addressed by a dotted `name`.
fn find_member<'a>(item: &'a Item, name: &str) -> Option<&'a Item> {
    if item.name == name {
        return Some(item);
    }
    if !name.starts_with(&format!("{}.", item.name)) {
        return None;
    }
    item.members.iter().find_map(|m| find_member(m, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_type(name: &str) -> ItemType {
        ItemType::builder()
            .name(name)
            .engineering_type(EngineeringType::Unsigned)
            .size_in_bits(8)
            .build()
    }

    fn fixture() -> SpaceSystem {
        SpaceSystem::builder()
            .name("Root")
            .parameter_types(vec![
                u8_type("U8"),
                ItemType::builder()
                    .name("Vec2")
                    .engineering_type(EngineeringType::Structure)
                    .members(vec![
                        Member::builder().name("x").type_ref("U8").build(),
                        Member::builder().name("y").type_ref("U8").build(),
                    ])
                    .build(),
            ])
            .parameters(vec![
                Parameter::builder().name("A").type_ref("U8").build(),
                Parameter::builder().name("Pos").type_ref("Vec2").build(),
            ])
            .space_systems(vec![SpaceSystem::builder()
                .name("Sub")
                .parameters(vec![Parameter::builder().name("B").type_ref("../U8").build()])
                .containers(vec![SequenceContainer::builder().name("Pkt").build()])
                .build()])
            .build()
    }

    #[test]
    fn indexes_parameters_and_members() {
        let db = Database::new(fixture()).unwrap();
        assert_eq!(db.name(), "Root");
        assert!(db.parameter("/Root/A").is_some());
        assert!(db.parameter("/Root/Sub/B").is_some());

        let pos = db.parameter("/Root/Pos").unwrap();
        assert_eq!(pos.members().len(), 2);
        let y = db.parameter("/Root/Pos.y").unwrap();
        assert_eq!(y.name(), "Pos.y");
        assert_eq!(y.item_type().size_in_bits, Some(8));
    }

    #[test]
    fn resolves_through_ancestors() {
        let db = Database::new(fixture()).unwrap();
        let a = db.resolve_parameter("/Root/Sub", "A").unwrap();
        assert_eq!(a.path(), "/Root/A");
        let b = db.resolve_parameter("/Root", "Sub/B").unwrap();
        assert_eq!(b.path(), "/Root/Sub/B");
        let c = db.resolve_container("/Root", "./Sub/Pkt").unwrap();
        assert_eq!(c.path(), "/Root/Sub/Pkt");
        assert_eq!(c.space_system(), "/Root/Sub");
    }

    #[test]
    fn strips_bad_leading_segments() {
        let db = Database::new(fixture()).unwrap();
        let b = db.resolve_parameter("/Root/Sub", "Wrong/B").unwrap();
        assert_eq!(b.path(), "/Root/Sub/B");
    }

    #[test]
    fn unresolved_reference() {
        let db = Database::new(fixture()).unwrap();
        let err = db.resolve_parameter("/Root", "Nope").unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { kind: "parameter", .. }));
    }

    #[test]
    fn recursive_aggregate_is_invalid() {
        let root = SpaceSystem::builder()
            .name("Root")
            .parameter_types(vec![ItemType::builder()
                .name("Loop")
                .engineering_type(EngineeringType::Structure)
                .members(vec![Member::builder().name("me").type_ref("Loop").build()])
                .build()])
            .parameters(vec![Parameter::builder().name("P").type_ref("Loop").build()])
            .build();
        let err = Database::new(root).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(_)), "{err}");
    }

    #[test]
    fn duplicate_parameter() {
        let root = SpaceSystem::builder()
            .name("Root")
            .parameter_types(vec![u8_type("U8")])
            .parameters(vec![
                Parameter::builder().name("A").type_ref("U8").build(),
                Parameter::builder().name("A").type_ref("U8").build(),
            ])
            .build();
        assert!(matches!(
            Database::new(root).unwrap_err(),
            Error::DuplicateDefinition(_)
        ));
    }

    #[test]
    fn from_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let db_path = tmpdir.path().join("db.json");
        std::fs::write(
            &db_path,
            r#"{
                "name": "Sat",
                "parameterTypes": [
                    {"name": "U16", "engineeringType": "UNSIGNED", "sizeInBits": 16}
                ],
                "parameters": [{"name": "Counter", "typeRef": "U16"}],
                "containers": [
                    {"name": "Hk", "entries": [{"reference": {"parameter": "Counter"}}]}
                ]
            }"#,
        )
        .unwrap();

        let db = Database::from_file(&db_path).unwrap();
        assert!(db.container("/Sat/Hk").is_some());
        assert_eq!(
            db.parameter("/Sat/Counter").unwrap().item_type().size_in_bits,
            Some(16)
        );
    }
}
