//! Type-token substitution in descriptors, signatures and class names.

/// Replaces one class type with another wherever it appears as a complete
/// type token. The structure of the surrounding descriptor is untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSubstitution {
    from: String,
    to: String,
}

impl TypeSubstitution {
    /// Both names are internal names, e.g. `java/util/ServiceLoader`.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn source_type(&self) -> &str {
        &self.from
    }

    pub fn target_type(&self) -> &str {
        &self.to
    }

    /// Rewrites a field descriptor, method descriptor or generic signature.
    /// Returns `None` when the text has no occurrence of the source type.
    pub fn in_descriptor(&self, text: &str) -> Option<String> {
        let needle = format!("L{}", self.from);
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut search = 0;
        let mut changed = false;

        while let Some(found) = text[search..].find(&needle) {
            let start = search + found;
            let end = start + needle.len();
            let opens_token = start == 0 || is_token_boundary(bytes[start - 1]);
            let closes_token = matches!(bytes.get(end), Some(b';') | Some(b'<'));
            if opens_token && closes_token {
                out.push_str(&text[copied..start + 1]);
                out.push_str(&self.to);
                copied = end;
                changed = true;
            }
            search = start + 1;
        }

        if !changed {
            return None;
        }
        out.push_str(&text[copied..]);
        Some(out)
    }

    /// Rewrites the name held by a `Class` constant: either an internal name
    /// or, for array classes, a field descriptor.
    pub fn in_class_name(&self, name: &str) -> Option<String> {
        if name == self.from {
            Some(self.to.clone())
        } else if name.starts_with('[') {
            self.in_descriptor(name)
        } else {
            None
        }
    }
}

/// Characters that may directly precede a class type in a descriptor or
/// signature. Identifier characters never do.
fn is_token_boundary(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'[' | b';' | b'<' | b'>' | b'+' | b'-' | b'*' | b':' | b'^'
    )
}

/// Binary name (`a.b.C$D`) to internal name (`a/b/C$D`).
pub fn internal_name(binary_name: &str) -> String {
    binary_name.replace('.', "/")
}

/// Internal name to binary name.
pub fn binary_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Field descriptor for an object type.
pub fn object_descriptor(internal_name: &str) -> String {
    format!("L{internal_name};")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> TypeSubstitution {
        TypeSubstitution::new("java/util/ServiceLoader", "io/johnsonlee/spi/ShadowServiceLoader")
    }

    #[test]
    fn test_method_descriptor_keeps_shape() {
        let rewritten = loader()
            .in_descriptor("(Ljava/lang/Class;Ljava/util/ServiceLoader;I)Ljava/util/ServiceLoader;")
            .unwrap();
        assert_eq!(
            rewritten,
            "(Ljava/lang/Class;Lio/johnsonlee/spi/ShadowServiceLoader;I)Lio/johnsonlee/spi/ShadowServiceLoader;"
        );
    }

    #[test]
    fn test_generic_signature() {
        let rewritten = loader()
            .in_descriptor("Ljava/util/List<Ljava/util/ServiceLoader<Lcom/x/Api;>;>;")
            .unwrap();
        assert_eq!(
            rewritten,
            "Ljava/util/List<Lio/johnsonlee/spi/ShadowServiceLoader<Lcom/x/Api;>;>;"
        );
    }

    #[test]
    fn test_lookalike_types_are_untouched() {
        let sub = loader();
        assert_eq!(sub.in_descriptor("Ljava/util/ServiceLoader$Provider;"), None);
        assert_eq!(sub.in_descriptor("Ljava/util/ServiceLoaderFactory;"), None);
        assert_eq!(sub.in_descriptor("Lcom/Ljava/util/ServiceLoader;"), None);
        assert_eq!(sub.in_descriptor("()V"), None);
    }

    #[test]
    fn test_class_names_and_arrays() {
        let sub = loader();
        assert_eq!(
            sub.in_class_name("java/util/ServiceLoader").as_deref(),
            Some("io/johnsonlee/spi/ShadowServiceLoader")
        );
        assert_eq!(
            sub.in_class_name("[[Ljava/util/ServiceLoader;").as_deref(),
            Some("[[Lio/johnsonlee/spi/ShadowServiceLoader;")
        );
        assert_eq!(sub.in_class_name("java/util/ServiceLoader$Provider"), None);
    }

    #[test]
    fn test_name_conversions() {
        assert_eq!(internal_name("com.x.impl.Foo"), "com/x/impl/Foo");
        assert_eq!(binary_name("com/x/Outer$Inner"), "com.x.Outer$Inner");
        assert_eq!(object_descriptor("com/x/Api"), "Lcom/x/Api;");
    }
}
