use rayon::prelude::*;
use tracing::debug;

use super::resolver::{Inherited, Resolver, Scope};
use super::{ContentEntry, ContentKind, ContentModel, EntryItem, ResolverOptions};
use crate::entry_value::EntryValue;
use crate::model::{Container, Database};
use crate::Result;

impl<'a> Resolver<'a, '_> {
    /// Inline `container` and place its `containerEnd` entries, including those
    /// declared by its base containers, once all of its content is known.
    pub(crate) fn container(
        &mut self,
        container: &'a Container,
        header: bool,
        inherited: &Inherited<'a>,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        let first = self.entries.len();
        self.inline_container(container, header, inherited, cursor, container_start)?;
        self.end_of_container(first, cursor)
    }

    /// Its base chain and restrictions, a header row if `header`, then its entries.
    fn inline_container(
        &mut self,
        container: &'a Container,
        header: bool,
        inherited: &Inherited<'a>,
        cursor: &mut u64,
        container_start: u64,
    ) -> Result<()> {
        self.enter(container.path())?;
        let def = container.definition();

        if let Some(base) = &def.base {
            let base_container = self
                .db
                .resolve_container(container.space_system(), &base.container_ref)?;
            self.inline_container(base_container, true, inherited, cursor, container_start)?;
            for criterion in &base.restriction_criteria {
                let restriction = self.comparison_value(container.space_system(), criterion)?;
                self.apply_restriction(&restriction);
            }
        }

        if header {
            self.entries.push(ContentEntry::new(
                EntryItem::Container(container),
                inherited.conditions.clone(),
                inherited.repeat_label.clone(),
                true,
            ));
        }
        self.process_entries(
            Scope::Container(container),
            &def.entries,
            inherited,
            cursor,
            container_start,
        )?;
        self.leave();
        Ok(())
    }
}

/// Resolves sequence containers into [ContentModel]s.
///
/// # Example
/// ```
/// use xtce::content::ContainerProcessor;
/// use xtce::model::{
///     Database, EngineeringType, ItemType, Parameter, SequenceContainer, SequenceEntry,
///     SpaceSystem,
/// };
///
/// let root = SpaceSystem::builder()
///     .name("Sat")
///     .parameter_types(vec![ItemType::builder()
///         .name("U8")
///         .engineering_type(EngineeringType::Unsigned)
///         .size_in_bits(8)
///         .build()])
///     .parameters(vec![
///         Parameter::builder().name("A").type_ref("U8").build(),
///         Parameter::builder().name("B").type_ref("U8").build(),
///     ])
///     .containers(vec![SequenceContainer::builder()
///         .name("Pkt")
///         .entries(vec![SequenceEntry::parameter("A"), SequenceEntry::parameter("B")])
///         .build()])
///     .build();
/// let db = Database::new(root).unwrap();
/// let processor = ContainerProcessor::new(&db);
///
/// let model = processor
///     .process_container(db.container("/Sat/Pkt").unwrap(), &[], Some(&[0x01, 0x02]))
///     .unwrap();
/// let b = model.find("B").next().unwrap();
/// assert_eq!(b.start_bit(), Some(8));
/// assert_eq!(b.value().unwrap().value(), "2");
/// ```
#[derive(Clone, Debug)]
pub struct ContainerProcessor<'a> {
    db: &'a Database,
    options: ResolverOptions,
}

impl<'a> ContainerProcessor<'a> {
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self::with_options(db, ResolverOptions::default())
    }

    #[must_use]
    pub fn with_options(db: &'a Database, options: ResolverOptions) -> Self {
        Self { db, options }
    }

    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolve `container`, binding `user_values` and, if given, values decoded from
    /// `binary`.
    ///
    /// # Errors
    /// [crate::Error::UnresolvedReference] for a reference that cannot be resolved,
    /// [crate::Error::InvalidDefinition] for a container that inherits from or includes
    /// itself, and [crate::Error::NotEnoughData] if `binary` is too short for a
    /// positioned entry.
    pub fn process_container(
        &self,
        container: &'a Container,
        user_values: &[EntryValue<'a>],
        binary: Option<&[u8]>,
    ) -> Result<ContentModel<'a>> {
        debug!(
            container = container.path(),
            user_values = user_values.len(),
            binary_bytes = binary.map(<[u8]>::len),
            "processing container"
        );
        let mut resolver = Resolver::new(self.db, &self.options, user_values, binary);
        let mut cursor = 0u64;
        resolver.container(container, true, &Inherited::default(), &mut cursor, 0)?;
        Ok(resolver.finish(container.name(), ContentKind::Container))
    }

    /// Resolve `container` against each of `buffers` concurrently.
    ///
    /// Results are in the order of `buffers`.
    pub fn decode_all<B>(
        &self,
        container: &'a Container,
        buffers: &[B],
    ) -> Vec<Result<ContentModel<'a>>>
    where
        B: AsRef<[u8]> + Sync,
    {
        buffers
            .par_iter()
            .map(|buf| self.process_container(container, &[], Some(buf.as_ref())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BaseContainer, Comparison, EngineeringType, Enumeration, ItemType, Location, Member,
        Parameter, ReferenceLocation, Repeat, SequenceContainer, SequenceEntry, SpaceSystem,
    };
    use crate::Error;

    fn u8_type() -> ItemType {
        ItemType::builder()
            .name("U8")
            .engineering_type(EngineeringType::Unsigned)
            .size_in_bits(8)
            .build()
    }

    fn database(parameters: &[&str], containers: Vec<SequenceContainer>) -> Database {
        let root = SpaceSystem::builder()
            .name("Root")
            .parameter_types(vec![
                u8_type(),
                ItemType::builder()
                    .name("Pair")
                    .engineering_type(EngineeringType::Structure)
                    .members(vec![
                        Member::builder().name("hi").type_ref("U8").build(),
                        Member::builder().name("lo").type_ref("U8").build(),
                    ])
                    .build(),
                ItemType::builder()
                    .name("Mode")
                    .engineering_type(EngineeringType::Enumerated)
                    .size_in_bits(8)
                    .enumerations(vec![
                        Enumeration::builder().value(0).label("OFF").build(),
                        Enumeration::builder().value(1).label("ON").build(),
                    ])
                    .build(),
            ])
            .parameters(
                parameters
                    .iter()
                    .map(|p| {
                        let ty = match *p {
                            "Pair" => "Pair",
                            "Mode" => "Mode",
                            _ => "U8",
                        };
                        Parameter::builder().name(*p).type_ref(ty).build()
                    })
                    .collect(),
            )
            .containers(containers)
            .build();
        Database::new(root).unwrap()
    }

    fn starts(model: &ContentModel) -> Vec<(String, Option<u64>)> {
        model
            .entries()
            .iter()
            .map(|e| (e.name().to_string(), e.start_bit()))
            .collect()
    }

    fn process<'a>(db: &'a Database, path: &str) -> ContentModel<'a> {
        ContainerProcessor::new(db)
            .process_container(db.container(path).unwrap(), &[], None)
            .unwrap()
    }

    #[test]
    fn consecutive_entries() {
        let db = database(
            &["A", "B"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::parameter("A"), SequenceEntry::parameter("B")])
                .build()],
        );
        let model = process(&db, "/Root/Pkt");
        assert_eq!(
            starts(&model),
            vec![
                ("Pkt".to_string(), None),
                ("A".to_string(), Some(0)),
                ("B".to_string(), Some(8)),
            ]
        );
        assert_eq!(model.total_size(), 16);
        assert!(model.is_valid());
        assert!(model.warnings().is_empty());
    }

    #[test]
    fn location_offsets() {
        let at = |reference, offset| Location::new(reference, offset);
        let db = database(
            &["A", "B", "C"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![
                    SequenceEntry::builder()
                        .reference(crate::model::EntryRef::Parameter("A".into()))
                        .location(at(ReferenceLocation::PreviousEntry, 4))
                        .build(),
                    SequenceEntry::builder()
                        .reference(crate::model::EntryRef::Parameter("B".into()))
                        .location(at(ReferenceLocation::ContainerStart, 32))
                        .build(),
                    SequenceEntry::builder()
                        .reference(crate::model::EntryRef::Parameter("C".into()))
                        .location(at(ReferenceLocation::ContainerEnd, 0))
                        .build(),
                ])
                .build()],
        );
        let model = process(&db, "/Root/Pkt");
        assert_eq!(model.find("A").next().unwrap().start_bit(), Some(4));
        assert_eq!(model.find("B").next().unwrap().start_bit(), Some(32));
        // end of the container is bit 40 once A and B are placed
        assert_eq!(model.find("C").next().unwrap().start_bit(), Some(40));
        assert_eq!(model.total_size(), 48);
    }

    #[test]
    fn next_entry_is_unsupported() {
        let db = database(
            &["A"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::builder()
                    .reference(crate::model::EntryRef::Parameter("A".into()))
                    .location(Location::new(ReferenceLocation::NextEntry, 0))
                    .build()])
                .build()],
        );
        let model = process(&db, "/Root/Pkt");
        assert_eq!(model.find("A").next().unwrap().start_bit(), None);
        assert_eq!(model.warnings().len(), 1);
    }

    #[test]
    fn restriction_binds_base_entries() {
        let db = database(
            &["Id", "A"],
            vec![
                SequenceContainer::builder()
                    .name("Header")
                    .is_abstract(true)
                    .entries(vec![SequenceEntry::parameter("Id")])
                    .build(),
                SequenceContainer::builder()
                    .name("Pkt")
                    .base(
                        BaseContainer::builder()
                            .container_ref("Header")
                            .restriction_criteria(vec![Comparison::builder()
                                .parameter_ref("Id")
                                .value("7")
                                .build()])
                            .build(),
                    )
                    .entries(vec![SequenceEntry::parameter("A")])
                    .build(),
            ],
        );
        let model = process(&db, "/Root/Pkt");
        let names: Vec<&str> = model.entries().iter().map(ContentEntry::name).collect();
        assert_eq!(names, ["Header", "Id", "Pkt", "A"]);
        let id = model.find("Id").next().unwrap();
        assert_eq!(id.value().unwrap().to_string(), "Id==7{cal}");
        assert_eq!(model.find("A").next().unwrap().start_bit(), Some(8));
    }

    #[test]
    fn restriction_conflict_invalidates() {
        let db = database(
            &["Id"],
            vec![
                SequenceContainer::builder()
                    .name("Header")
                    .entries(vec![SequenceEntry::parameter("Id")])
                    .build(),
                SequenceContainer::builder()
                    .name("Pkt")
                    .base(
                        BaseContainer::builder()
                            .container_ref("Header")
                            .restriction_criteria(vec![Comparison::builder()
                                .parameter_ref("Id")
                                .value("7")
                                .build()])
                            .build(),
                    )
                    .build(),
            ],
        );
        let processor = ContainerProcessor::new(&db);
        let pkt = db.container("/Root/Pkt").unwrap();
        let model = processor.process_container(pkt, &[], Some(&[7])).unwrap();
        assert!(model.is_valid());
        let model = processor.process_container(pkt, &[], Some(&[8])).unwrap();
        assert!(!model.is_valid());
        assert!(model.warnings()[0].contains("conflicts"), "{:?}", model.warnings());
    }

    fn base_with_trailer(restriction: Option<&str>) -> Database {
        let mut base = BaseContainer::builder().container_ref("Base").build();
        if let Some(value) = restriction {
            base.restriction_criteria = vec![Comparison::builder()
                .parameter_ref("Crc")
                .value(value)
                .build()];
        }
        database(
            &["Id", "Crc", "Data"],
            vec![
                SequenceContainer::builder()
                    .name("Base")
                    .is_abstract(true)
                    .entries(vec![
                        SequenceEntry::parameter("Id"),
                        SequenceEntry::builder()
                            .reference(crate::model::EntryRef::Parameter("Crc".into()))
                            .location(Location::new(ReferenceLocation::ContainerEnd, 0))
                            .build(),
                    ])
                    .build(),
                SequenceContainer::builder()
                    .name("Pkt")
                    .base(base)
                    .entries(vec![SequenceEntry::parameter("Data")])
                    .build(),
            ],
        )
    }

    #[test]
    fn base_container_end_follows_derived_entries() {
        let db = base_with_trailer(None);
        let model = ContainerProcessor::new(&db)
            .process_container(db.container("/Root/Pkt").unwrap(), &[], Some(&[1, 2, 3]))
            .unwrap();
        assert_eq!(
            starts(&model),
            vec![
                ("Base".to_string(), None),
                ("Id".to_string(), Some(0)),
                ("Pkt".to_string(), None),
                ("Data".to_string(), Some(8)),
                ("Crc".to_string(), Some(16)),
            ]
        );
        assert!(model.warnings().is_empty(), "{:?}", model.warnings());
        assert_eq!(model.find("Crc").next().unwrap().value().unwrap().value(), "3");
        assert_eq!(model.total_size(), 24);
    }

    #[test]
    fn restriction_on_container_end_entry() {
        let db = base_with_trailer(Some("3"));
        let processor = ContainerProcessor::new(&db);
        let pkt = db.container("/Root/Pkt").unwrap();

        let model = processor.process_container(pkt, &[], None).unwrap();
        let crc = model.find("Crc").next().unwrap();
        assert_eq!(crc.start_bit(), Some(16));
        assert_eq!(crc.value().unwrap().to_string(), "Crc==3{cal}");

        let model = processor.process_container(pkt, &[], Some(&[1, 2, 3])).unwrap();
        assert!(model.is_valid(), "{:?}", model.warnings());

        let model = processor.process_container(pkt, &[], Some(&[1, 2, 9])).unwrap();
        assert!(!model.is_valid());
        assert!(model.warnings()[0].contains("conflicts"), "{:?}", model.warnings());
    }

    fn conditional_nested(item: &str, repeat: Option<Repeat>) -> Database {
        let mut entry = SequenceEntry::builder()
            .reference(if item == "Sub" {
                crate::model::EntryRef::Container("Sub".into())
            } else {
                crate::model::EntryRef::Parameter(item.into())
            })
            .include_conditions(vec![Comparison::builder()
                .parameter_ref("Flag")
                .value("1")
                .build()])
            .build();
        entry.repeat = repeat;
        database(
            &["Flag", "X", "Y", "Pair"],
            vec![
                SequenceContainer::builder()
                    .name("Sub")
                    .entries(vec![SequenceEntry::parameter("X"), SequenceEntry::parameter("Y")])
                    .build(),
                SequenceContainer::builder()
                    .name("Pkt")
                    .entries(vec![SequenceEntry::parameter("Flag"), entry])
                    .build(),
            ],
        )
    }

    #[test]
    fn repeated_nested_container() {
        let db = conditional_nested("Sub", Some(Repeat::Fixed(2)));
        let model = ContainerProcessor::new(&db)
            .process_container(db.container("/Root/Pkt").unwrap(), &[], Some(&[1, 2, 3, 4, 5]))
            .unwrap();
        assert_eq!(
            starts(&model),
            vec![
                ("Pkt".to_string(), None),
                ("Flag".to_string(), Some(0)),
                ("Sub".to_string(), None),
                ("X".to_string(), Some(8)),
                ("Y".to_string(), Some(16)),
                ("Sub".to_string(), None),
                ("X".to_string(), Some(24)),
                ("Y".to_string(), Some(32)),
            ]
        );
        let xs: Vec<(&str, &str)> = model
            .find("X")
            .map(|e| (e.repeat_label(), e.value().unwrap().value()))
            .collect();
        assert_eq!(xs, [("Repeat 1 of 2", "2"), ("Repeat 2 of 2", "4")]);
        assert_eq!(model.total_size(), 40);
        assert!(model.warnings().is_empty(), "{:?}", model.warnings());
    }

    #[test]
    fn unused_nested_container_is_not_expanded() {
        let db = conditional_nested("Sub", Some(Repeat::Fixed(2)));
        let model = ContainerProcessor::new(&db)
            .process_container(db.container("/Root/Pkt").unwrap(), &[], Some(&[0]))
            .unwrap();
        assert_eq!(
            starts(&model),
            vec![
                ("Pkt".to_string(), None),
                ("Flag".to_string(), Some(0)),
                ("Sub".to_string(), None),
            ]
        );
        assert!(!model.find("Sub").next().unwrap().is_in_use());
        assert_eq!(model.total_size(), 8);
    }

    #[test]
    fn show_all_lists_unused_nested_content() {
        let db = conditional_nested("Sub", Some(Repeat::Fixed(2)));
        let options = ResolverOptions::builder().show_all_conditions(true).build();
        let model = ContainerProcessor::with_options(&db, options)
            .process_container(db.container("/Root/Pkt").unwrap(), &[], Some(&[0]))
            .unwrap();
        assert_eq!(
            starts(&model),
            vec![
                ("Pkt".to_string(), None),
                ("Flag".to_string(), Some(0)),
                ("Sub".to_string(), None),
                ("X".to_string(), None),
                ("Y".to_string(), None),
            ]
        );
        assert!(model.entries()[2..].iter().all(|e| !e.is_in_use()));
        assert_eq!(model.total_size(), 8);
    }

    #[test]
    fn unused_aggregate_members() {
        let db = conditional_nested("Pair", None);
        let pkt = db.container("/Root/Pkt").unwrap();

        let model = ContainerProcessor::new(&db)
            .process_container(pkt, &[], Some(&[0]))
            .unwrap();
        let names: Vec<&str> = model.entries().iter().map(ContentEntry::name).collect();
        assert_eq!(names, ["Pkt", "Flag", "Pair"]);

        let options = ResolverOptions::builder().show_all_conditions(true).build();
        let model = ContainerProcessor::with_options(&db, options)
            .process_container(pkt, &[], Some(&[0]))
            .unwrap();
        let unused: Vec<(&str, Option<u64>, bool)> = model.entries()[2..]
            .iter()
            .map(|e| (e.name(), e.start_bit(), e.is_in_use()))
            .collect();
        assert_eq!(
            unused,
            [("Pair", None, false), ("Pair.hi", None, false), ("Pair.lo", None, false)]
        );

        let model = ContainerProcessor::new(&db)
            .process_container(pkt, &[], Some(&[1, 0xaa, 0xbb]))
            .unwrap();
        let lo = model.find("Pair.lo").next().unwrap();
        assert_eq!(lo.start_bit(), Some(16));
        assert_eq!(lo.value().unwrap().value(), "187");
    }

    #[test]
    fn aggregate_members_follow_parent() {
        let db = database(
            &["A", "Pair"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::parameter("A"), SequenceEntry::parameter("Pair")])
                .build()],
        );
        let model = process(&db, "/Root/Pkt");
        assert_eq!(
            starts(&model),
            vec![
                ("Pkt".to_string(), None),
                ("A".to_string(), Some(0)),
                ("Pair".to_string(), None),
                ("Pair.hi".to_string(), Some(8)),
                ("Pair.lo".to_string(), Some(16)),
            ]
        );
    }

    #[test]
    fn fixed_repeat() {
        let db = database(
            &["A"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::builder()
                    .reference(crate::model::EntryRef::Parameter("A".into()))
                    .repeat(Repeat::Fixed(2))
                    .build()])
                .build()],
        );
        let model = process(&db, "/Root/Pkt");
        let labels: Vec<&str> = model.find("A").map(ContentEntry::repeat_label).collect();
        assert_eq!(labels, ["Repeat 1 of 2", "Repeat 2 of 2"]);
        assert_eq!(model.total_size(), 16);
    }

    #[test]
    fn include_condition_on_decoded_value() {
        let db = database(
            &["Mode", "A"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![
                    SequenceEntry::parameter("Mode"),
                    SequenceEntry::builder()
                        .reference(crate::model::EntryRef::Parameter("A".into()))
                        .include_conditions(vec![Comparison::builder()
                            .parameter_ref("Mode")
                            .value("ON")
                            .build()])
                        .build(),
                ])
                .build()],
        );
        let processor = ContainerProcessor::new(&db);
        let pkt = db.container("/Root/Pkt").unwrap();

        let on = processor.process_container(pkt, &[], Some(&[1, 42])).unwrap();
        let a = on.find("A").next().unwrap();
        assert!(a.is_in_use());
        assert_eq!(a.value().unwrap().value(), "42");

        let off = processor.process_container(pkt, &[], Some(&[0])).unwrap();
        let a = off.find("A").next().unwrap();
        assert!(!a.is_in_use());
        assert_eq!(a.start_bit(), None);
        assert_eq!(off.total_size(), 8);
    }

    #[test]
    fn user_values_are_bound() {
        let db = database(
            &["Mode"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::parameter("Mode")])
                .build()],
        );
        let mode = db.parameter("/Root/Mode").unwrap();
        let values = [EntryValue::calibrated(mode, "ON")];
        let model = ContainerProcessor::new(&db)
            .process_container(db.container("/Root/Pkt").unwrap(), &values, None)
            .unwrap();
        assert_eq!(model.values().count(), 1);
        let encoded = model.encode();
        assert!(encoded.is_clean(), "{:?}", encoded.warnings);
        assert_eq!(encoded.value, vec![1]);
    }

    #[test]
    fn self_inheritance_is_invalid() {
        let db = database(
            &[],
            vec![SequenceContainer::builder()
                .name("Loop")
                .base(BaseContainer::builder().container_ref("Loop").build())
                .build()],
        );
        let err = ContainerProcessor::new(&db)
            .process_container(db.container("/Root/Loop").unwrap(), &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(_)), "{err}");
    }

    #[test]
    fn decode_all_in_parallel() {
        let db = database(
            &["A"],
            vec![SequenceContainer::builder()
                .name("Pkt")
                .entries(vec![SequenceEntry::parameter("A")])
                .build()],
        );
        let buffers: Vec<Vec<u8>> = (0u8..16).map(|b| vec![b]).collect();
        let models = ContainerProcessor::new(&db)
            .decode_all(db.container("/Root/Pkt").unwrap(), &buffers);
        assert_eq!(models.len(), 16);
        for (idx, model) in models.into_iter().enumerate() {
            let model = model.unwrap();
            assert_eq!(model.find("A").next().unwrap().value().unwrap().value(), idx.to_string());
        }
        let short: [&[u8]; 1] = [&[]];
        let models = ContainerProcessor::new(&db)
            .decode_all(db.container("/Root/Pkt").unwrap(), &short);
        assert!(matches!(models[0], Err(Error::NotEnoughData { .. })));
    }
}
