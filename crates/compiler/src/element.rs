//! Compiled classes seen by a processing round.

use crate::error::{ProcessorError, Result};
use crate::hierarchy::{ClasspathHierarchy, Supertypes, read_class};
use ristretto_classfile::attributes::{Annotation, AnnotationElement, Attribute};
use ristretto_classfile::{ClassFile, ConstantPool};
use shadowloader_classfile::descriptor::binary_name;

pub const AUTO_SERVICE_DESCRIPTOR: &str = "Lcom/google/auto/service/AutoService;";

/// A class carrying the provider annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedElement {
    /// Internal name, nested classes joined with `$`.
    pub name: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    /// Internal names of the service interfaces named by the annotation, in
    /// declaration order without repeats.
    pub services: Vec<String>,
}

impl AnnotatedElement {
    /// Reads the annotation off a parsed class; `None` when it is not annotated.
    pub fn from_class(class: &ClassFile) -> Result<Option<Self>> {
        let pool = &class.constant_pool;
        let mut annotation = None;
        for candidate in class_annotations(class) {
            if utf8(pool, candidate.type_index)? == AUTO_SERVICE_DESCRIPTOR {
                annotation = Some(candidate);
                break;
            }
        }
        let Some(annotation) = annotation else {
            return Ok(None);
        };

        let mut services = Vec::new();
        for pair in &annotation.elements {
            if utf8(pool, pair.name_index)? == "value" {
                collect_class_literals(pool, &pair.value, &mut services)?;
            }
        }

        let (name, supertypes) = Supertypes::of(class)?;
        Ok(Some(Self {
            name,
            super_class: supertypes.super_class,
            interfaces: supertypes.interfaces,
            services,
        }))
    }

    pub fn binary_name(&self) -> String {
        binary_name(&self.name)
    }
}

/// Annotations from both the visible and invisible class attributes.
fn class_annotations(class: &ClassFile) -> impl Iterator<Item = &Annotation> {
    class
        .attributes
        .iter()
        .flat_map(|attribute| -> &[Annotation] {
            match attribute {
                Attribute::RuntimeVisibleAnnotations { annotations, .. }
                | Attribute::RuntimeInvisibleAnnotations { annotations, .. } => annotations,
                _ => &[],
            }
        })
}

fn utf8(pool: &ConstantPool, index: u16) -> Result<String> {
    Ok(pool.try_get_utf8(index)?.to_string())
}

fn collect_class_literals(
    pool: &ConstantPool,
    value: &AnnotationElement,
    out: &mut Vec<String>,
) -> Result<()> {
    match value {
        AnnotationElement::Class { class_info_index } => {
            let descriptor = utf8(pool, *class_info_index)?;
            if let Some(name) = descriptor
                .strip_prefix('L')
                .and_then(|rest| rest.strip_suffix(';'))
            {
                if !out.iter().any(|seen| seen == name) {
                    out.push(name.to_string());
                }
            }
        }
        AnnotationElement::Array { values } => {
            for value in values {
                collect_class_literals(pool, value, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The annotated elements of one round.
#[derive(Debug, Default)]
pub struct RoundEnvironment {
    pub elements: Vec<AnnotatedElement>,
    /// Classes of the round that could not be read.
    pub unreadable: Vec<ProcessorError>,
    /// Set on the last round, after every source has been processed.
    pub processing_over: bool,
}

impl RoundEnvironment {
    pub fn new(elements: Vec<AnnotatedElement>, processing_over: bool) -> Self {
        Self {
            elements,
            unreadable: Vec::new(),
            processing_over,
        }
    }

    /// A round over the given compiled classes.
    ///
    /// Each class is parsed once; its supertypes go into `hierarchy` and it
    /// joins the round only when annotated. A class that fails to parse is
    /// kept in [`Self::unreadable`] and the rest of the round still loads.
    pub fn from_classes(classes: &[Vec<u8>], hierarchy: &ClasspathHierarchy) -> Self {
        let mut round = Self::default();
        for (index, bytes) in classes.iter().enumerate() {
            match read_element(bytes, hierarchy) {
                Ok(Some(element)) => round.elements.push(element),
                Ok(None) => {}
                Err(source) => round.unreadable.push(ProcessorError::Unreadable {
                    index,
                    source: Box::new(source),
                }),
            }
        }
        round
    }

    /// The final round.
    pub fn over() -> Self {
        Self::new(Vec::new(), true)
    }
}

fn read_element(bytes: &[u8], hierarchy: &ClasspathHierarchy) -> Result<Option<AnnotatedElement>> {
    let class = read_class(bytes)?;
    hierarchy.insert_parsed(&class)?;
    AnnotatedElement::from_class(&class)
}
