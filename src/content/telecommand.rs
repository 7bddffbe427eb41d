use tracing::debug;

use super::resolver::{Inherited, Resolver, Scope};
use super::{ContentEntry, ContentKind, ContentModel, EntryItem, ResolverOptions};
use crate::entry_value::EntryValue;
use crate::model::{ArgumentAssignment, Database, Telecommand};
use crate::Result;

impl<'a> Resolver<'a, '_> {
    /// Inline `command` and place the `containerEnd` entries of its whole base chain.
    pub(crate) fn telecommand(&mut self, command: &'a Telecommand, cursor: &mut u64) -> Result<()> {
        let first = self.entries.len();
        self.inline_telecommand(command, cursor)?;
        self.end_of_container(first, cursor)
    }

    /// Its base command chain with argument assignments, a header row, then its entries.
    fn inline_telecommand(&mut self, command: &'a Telecommand, cursor: &mut u64) -> Result<()> {
        self.enter(command.path())?;
        let def = command.definition();

        if let Some(base) = &def.base {
            let base_command = self
                .db
                .resolve_telecommand(command.space_system(), &base.command_ref)?;
            self.inline_telecommand(base_command, cursor)?;
            for assignment in &base.argument_assignments {
                self.assign(assignment);
            }
        }

        self.entries.push(ContentEntry::new(
            EntryItem::Telecommand(command),
            Vec::new(),
            String::new(),
            true,
        ));
        self.process_entries(
            Scope::Telecommand(command),
            &def.entries,
            &Inherited::default(),
            cursor,
            0,
        )?;
        self.leave();
        Ok(())
    }

    /// Overwrite the value of every argument entry named by `assignment`.
    fn assign(&mut self, assignment: &ArgumentAssignment) {
        let mut matched = false;
        for entry in &mut self.entries {
            let EntryItem::Argument(item) = entry.item else {
                continue;
            };
            if item.name() == assignment.argument_name {
                entry.value = Some(EntryValue::calibrated(item, assignment.value.clone()));
                matched = true;
            }
        }
        if !matched {
            self.warn(format!(
                "assignment {}={} matches no argument",
                assignment.argument_name, assignment.value
            ));
        }
    }
}

/// Resolves telecommands into [ContentModel]s.
///
/// Arguments take, in increasing precedence, their initial value, a caller supplied
/// value, the value decoded from binary, and finally an assignment made by a command
/// deriving from the one declaring them.
#[derive(Clone, Debug)]
pub struct TelecommandProcessor<'a> {
    db: &'a Database,
    options: ResolverOptions,
}

impl<'a> TelecommandProcessor<'a> {
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self::with_options(db, ResolverOptions::default())
    }

    #[must_use]
    pub fn with_options(db: &'a Database, options: ResolverOptions) -> Self {
        Self { db, options }
    }

    /// Resolve `command`, binding `user_values` and, if given, values decoded from
    /// `binary`.
    ///
    /// # Errors
    /// [crate::Error::UnresolvedReference] for a reference that cannot be resolved,
    /// [crate::Error::InvalidDefinition] for a cyclic base command chain, and
    /// [crate::Error::NotEnoughData] if `binary` is too short for a positioned entry.
    pub fn process_telecommand(
        &self,
        command: &'a Telecommand,
        user_values: &[EntryValue<'a>],
        binary: Option<&[u8]>,
    ) -> Result<ContentModel<'a>> {
        debug!(
            telecommand = command.path(),
            user_values = user_values.len(),
            binary_bytes = binary.map(<[u8]>::len),
            "processing telecommand"
        );
        if command.definition().is_abstract {
            debug!(telecommand = command.path(), "telecommand is abstract");
        }
        let mut resolver = Resolver::new(self.db, &self.options, user_values, binary);
        let mut cursor = 0u64;
        resolver.telecommand(command, &mut cursor)?;
        Ok(resolver.finish(command.name(), ContentKind::Argument))
    }
}
