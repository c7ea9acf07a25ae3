use super::nxdl::{Definition, NodeKind, SchemaNode};
use super::path::{NexusPath, Segment};
use super::template::{Optionality, Template};

/// Build the empty template of an application definition.
///
/// Every declared field and attribute is registered in schema form with an empty value.
/// Nodes contributed by base classes are not walked; readers may still fill them, and the
/// template routes them through schema matching.
pub fn generate(definition: &Definition) -> Template {
    let mut template = Template::new();
    for child in definition.root.children.iter().filter(|c| !c.inherited) {
        walk(child, &NexusPath::root(), &mut template);
    }
    log::debug!(
        "Generated template for {} with {} paths and {} lone groups",
        definition.name,
        template.len(),
        template.lone_groups().len()
    );
    template
}

fn walk(node: &SchemaNode, parent: &NexusPath, template: &mut Template) {
    let path = parent.child(node.segment());
    let key = path.to_string();

    if let Some(items) = &node.enumeration {
        template.set_enumeration(&key, items.clone());
    }

    match node.kind {
        NodeKind::Group => {
            if let Some(class) = &node.nx_class {
                template.set_group_class(&key, class);
            }
            if node.is_required() && !has_required_leaf(node) {
                template.add_lone_group(&key);
            }
            for child in node.children.iter().filter(|c| !c.inherited) {
                walk(child, &path, template);
            }
        }
        NodeKind::Field => {
            template.register(&key, node.optionality);
            if node.takes_units() && !node.children.iter().any(|c| c.concept == "units") {
                let units = path.child(Segment::attribute("units"));
                template.register(&units.to_string(), node.optionality);
            }
            for child in node.children.iter().filter(|c| !c.inherited) {
                walk(child, &path, template);
            }
        }
        NodeKind::Attribute => template.register(&key, node.optionality),
    }
}

pub(crate) fn has_required_leaf(node: &SchemaNode) -> bool {
    node.children.iter().filter(|c| !c.inherited).any(|child| {
        child.is_required() && (child.kind != NodeKind::Group || has_required_leaf(child))
    })
}

/// Paths of a generated template that a reader must fill, in instance form with default names
pub fn required_paths(template: &Template) -> Vec<String> {
    template
        .iter_partition(Optionality::Required)
        .filter_map(|(path, _)| super::path::to_instance_form(path, &[]).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nxdl::{bundled_definitions, NxdlLoader};

    fn generated() -> Template {
        let definition = NxdlLoader::new(&bundled_definitions())
            .load("NXtest")
            .unwrap();
        generate(&definition)
    }

    #[test]
    fn test_generated_partitions() {
        let template = generated();
        let class = |path: &str| template.optionality_of(path);
        assert_eq!(
            class("/ENTRY/NXODD_name/int_value"),
            Some(Optionality::Required)
        );
        assert_eq!(
            class("/ENTRY/NXODD_name/int_value/@units"),
            Some(Optionality::Required)
        );
        assert_eq!(
            class("/ENTRY/NXODD_name/float_value"),
            Some(Optionality::Optional)
        );
        assert_eq!(
            class("/ENTRY/NXODD_name/float_value/@units"),
            Some(Optionality::Optional)
        );
        assert_eq!(class("/ENTRY/program_name"), Some(Optionality::Recommended));
        assert_eq!(class("/ENTRY/definition/@version"), Some(Optionality::Required));
        // NX_CHAR fields and unitless categories carry no units attribute
        assert_eq!(class("/ENTRY/NXODD_name/char_value/@units"), None);
        assert_eq!(class("/ENTRY/NXODD_name/bool_value/@units"), None);
        // base-class contributions are not generated
        assert_eq!(class("/ENTRY/start_time"), None);
        assert!(template.populated().is_empty());
    }

    #[test]
    fn test_every_path_in_exactly_one_partition() {
        let template = generated();
        for (_, path, _) in template.iter() {
            let count = Optionality::ALL
                .into_iter()
                .filter(|class| template.partition(*class).contains_key(path))
                .count();
            assert_eq!(count, 1, "{path}");
        }
    }

    #[test]
    fn test_side_tables() {
        let template = generated();
        let odd: NexusPath = "/ENTRY/NXODD_name".parse().unwrap();
        assert_eq!(template.group_class(&odd), Some("NXdata"));
        let kind: NexusPath = "/ENTRY[my_entry]/NXODD_name/type".parse().unwrap();
        assert_eq!(template.enumeration(&kind).map(|e| e.len()), Some(4));
        assert!(template
            .lone_groups()
            .contains("/ENTRY/NXODD_name/optional_parent/required_group"));
        assert!(!template.lone_groups().contains("/ENTRY/NXODD_name"));
        assert!(required_paths(&template)
            .contains(&String::from("/ENTRY[entry]/NXODD_name/int_value")));
    }
}
