use shadowloader_classfile::attribute::{CODE, RUNTIME_VISIBLE_ANNOTATIONS, encode_annotations};
use shadowloader_classfile::opcode::{ACONST_NULL, ARETURN, ATHROW, INVOKESTATIC, LDC_W, RETURN};
use shadowloader_classfile::{
    Annotation, ClassBuilder, ClassUnit, CodeAttribute, ElementValue, access,
};
use shadowloader_compiler::{DiagnosticKind, ProcessorOptions};
use shadowloader_core::facade::{SERVICE_REGISTRY, SHADOW_SERVICE_LOADER};
use shadowloader_core::{TransformConfig, UnitRole};
use shadowloader_runtime::{BuildError, BuildRequest, run_build};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn provider(name: &str, implements: &[&str], services: &[&str]) -> Vec<u8> {
    let mut builder = ClassBuilder::new(name, "java/lang/Object").unwrap();
    for interface in implements {
        builder = builder.implements(interface).unwrap();
    }
    let annotation = Annotation {
        type_descriptor: "Lcom/google/auto/service/AutoService;".to_string(),
        elements: vec![(
            "value".to_string(),
            ElementValue::Array(
                services
                    .iter()
                    .map(|service| ElementValue::Class(format!("L{service};")))
                    .collect(),
            ),
        )],
    };
    let info = encode_annotations(&[annotation], builder.pool()).unwrap();
    builder
        .attribute(RUNTIME_VISIBLE_ANNOTATIONS, info)
        .unwrap()
        .build()
        .to_bytes()
        .unwrap()
}

fn interface(name: &str) -> Vec<u8> {
    ClassBuilder::new(name, "java/lang/Object")
        .unwrap()
        .access(access::ACC_PUBLIC | access::ACC_INTERFACE | access::ACC_ABSTRACT)
        .build()
        .to_bytes()
        .unwrap()
}

fn registry(initializer: Option<Vec<u8>>) -> Vec<u8> {
    let builder = ClassBuilder::new(SERVICE_REGISTRY, "java/lang/Object").unwrap();
    let builder = match initializer {
        Some(body) => builder
            .method(
                access::ACC_STATIC,
                "<clinit>",
                "()V",
                None,
                Some(CodeAttribute::new(0, 0, body)),
            )
            .unwrap(),
        None => builder,
    };
    builder.build().to_bytes().unwrap()
}

fn loader_client(name: &str) -> Vec<u8> {
    ClassBuilder::new(name, "java/lang/Object")
        .unwrap()
        .method_with(
            access::ACC_PUBLIC | access::ACC_STATIC,
            "load",
            "()Ljava/util/ServiceLoader;",
            1,
            0,
            |code| {
                code.ldc_class("com/x/Api")?
                    .invoke(
                        INVOKESTATIC,
                        "java/util/ServiceLoader",
                        "load",
                        "(Ljava/lang/Class;)Ljava/util/ServiceLoader;",
                    )?
                    .op(ARETURN);
                Ok(())
            },
        )
        .unwrap()
        .build()
        .to_bytes()
        .unwrap()
}

fn services_dir(root: &Path, interface: &str, content: &str) -> PathBuf {
    let services = root.join("META-INF/services");
    std::fs::create_dir_all(&services).unwrap();
    std::fs::write(services.join(interface), content).unwrap();
    root.to_path_buf()
}

fn services_jar(path: &Path, interface: &str, content: &str) -> PathBuf {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file(format!("META-INF/services/{interface}"), options)
        .unwrap();
    zip.write_all(content.as_bytes()).unwrap();
    zip.finish().unwrap();
    path.to_path_buf()
}

fn initializer_code(bytes: &[u8]) -> (ClassUnit, CodeAttribute) {
    let unit = ClassUnit::parse(bytes).unwrap();
    let index = unit.find_method("<clinit>", "()V").unwrap();
    let (_, raw) = unit.methods[index]
        .attribute(&unit.constant_pool, CODE)
        .unwrap();
    let code = CodeAttribute::parse(&raw.info).unwrap();
    (unit, code)
}

fn registered_creators(unit: &ClassUnit, code: &CodeAttribute) -> Vec<String> {
    let insns = code.instructions().unwrap();
    insns
        .iter()
        .filter(|insn| insn.opcode == shadowloader_classfile::opcode::NEW)
        .map(|insn| {
            unit.constant_pool
                .class_name(insn.u2_operand(&code.code))
                .unwrap()
                .to_string()
        })
        .collect()
}

#[test]
fn test_scanned_and_annotated_declarations_both_register() {
    let dir = tempdir().unwrap();
    let lib = services_dir(
        &dir.path().join("lib"),
        "com.x.Api",
        "com.x.impl.Foo\n# comment\n\n",
    );

    let outcome = run_build(BuildRequest {
        classpath: vec![lib],
        units: vec![
            interface("com/x/Api"),
            provider("com/x/impl/Foo", &["com/x/Api"], &["com/x/Api"]),
            registry(Some(vec![RETURN])),
        ],
        ..Default::default()
    })
    .unwrap();

    assert_eq!(
        outcome.declarations.providers("com.x.Api").unwrap(),
        ["com.x.impl.Foo", "com.x.impl.Foo"]
    );
    let creator_names: Vec<&str> = outcome.creators.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(creator_names, ["com/x/impl/Foo_Creator"]);

    let registry_unit = outcome
        .units
        .iter()
        .find(|unit| unit.role == UnitRole::Registry)
        .unwrap();
    let (unit, code) = initializer_code(&registry_unit.bytes);
    assert_eq!(
        registered_creators(&unit, &code),
        ["com/x/impl/Foo_Creator", "com/x/impl/Foo_Creator"]
    );
    assert_eq!(code.code.last(), Some(&RETURN));
    assert_eq!(code.code[0], LDC_W);
}

#[test]
fn test_ignored_namespace_passes_through_byte_for_byte() {
    let widget = loader_client("android/widget/Widget");
    let outcome = run_build(BuildRequest {
        units: vec![widget.clone(), loader_client("com/x/App")],
        ..Default::default()
    })
    .unwrap();

    assert_eq!(outcome.units[0].role, UnitRole::Ignored);
    assert_eq!(outcome.units[0].bytes, widget);
    assert!(!outcome.units[0].changed);

    let app = ClassUnit::parse(&outcome.units[1].bytes).unwrap();
    assert!(
        app.constant_pool
            .utf8_entries()
            .any(|(_, text)| text == SHADOW_SERVICE_LOADER)
    );
}

#[test]
fn test_registry_without_initializer_gains_one() {
    let dir = tempdir().unwrap();
    let lib = services_dir(&dir.path().join("lib"), "a.B", "a.impl.C\n");

    let outcome = run_build(BuildRequest {
        classpath: vec![lib],
        units: vec![registry(None)],
        ..Default::default()
    })
    .unwrap();

    let (unit, code) = initializer_code(&outcome.units[0].bytes);
    let method = &unit.methods[unit.find_method("<clinit>", "()V").unwrap()];
    assert_eq!(method.access_flags, access::ACC_STATIC);
    assert_eq!(registered_creators(&unit, &code), ["a/impl/C_Creator"]);
    let opcodes: Vec<u8> = code
        .instructions()
        .unwrap()
        .iter()
        .map(|insn| insn.opcode)
        .collect();
    assert_eq!(opcodes.len(), 6);
    assert_eq!(opcodes.last(), Some(&RETURN));
}

#[test]
fn test_directory_and_jar_classpaths_register_the_same() {
    let dir = tempdir().unwrap();
    let content = "# providers\ncom.x.impl.One\ncom.x.impl.Two\n";
    let from_dir = services_dir(&dir.path().join("classes"), "com.x.Api", content);
    let from_jar = services_jar(&dir.path().join("lib.jar"), "com.x.Api", content);

    let run = |entry: PathBuf| {
        run_build(BuildRequest {
            classpath: vec![entry],
            units: vec![registry(Some(vec![RETURN]))],
            ..Default::default()
        })
        .unwrap()
    };
    let a = run(from_dir);
    let b = run(from_jar);

    assert_eq!(a.declarations, b.declarations);
    assert_eq!(a.units[0].bytes, b.units[0].bytes);
}

#[test]
fn test_verify_mode_skips_non_implementers() {
    let outcome = run_build(BuildRequest {
        options: ProcessorOptions::parse(["verify=true"]),
        units: vec![
            interface("com/x/Api"),
            provider("com/x/impl/Good", &["com/x/Api"], &["com/x/Api"]),
            provider("com/x/impl/Bad", &[], &["com/x/Api"]),
            registry(Some(vec![RETURN])),
        ],
        ..Default::default()
    })
    .unwrap();

    assert_eq!(
        outcome.declarations.providers("com.x.Api").unwrap(),
        ["com.x.impl.Good"]
    );
    assert!(outcome.diagnostics.iter().any(|d| d.kind == DiagnosticKind::Error
        && d.message.contains("com.x.impl.Bad does not implement com.x.Api")));
    assert_eq!(
        outcome.resources,
        [(
            "META-INF/services/com.x.Api".to_string(),
            "com.x.impl.Good\n".to_string()
        )]
    );
}

#[test]
fn test_unpatchable_registry_fails_the_build() {
    let dir = tempdir().unwrap();
    let lib = services_dir(&dir.path().join("lib"), "a.B", "a.impl.C\n");
    let err = run_build(BuildRequest {
        classpath: vec![lib],
        units: vec![registry(Some(vec![ACONST_NULL, ATHROW]))],
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, BuildError::Transform(_)));
}

#[test]
fn test_custom_ignore_set_from_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("shadowloader.json");
    std::fs::write(&config_path, r#"{"ignored_namespaces": ["com"]}"#).unwrap();
    let config = TransformConfig::load(&config_path).unwrap();

    let app = loader_client("com/x/App");
    let outcome = run_build(BuildRequest {
        config,
        units: vec![app.clone()],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(outcome.units[0].bytes, app);
}

#[test]
fn test_unreadable_project_class_fails_generation() {
    let err = run_build(BuildRequest {
        units: vec![
            interface("com/x/Api"),
            b"\xca\xfe\xba\xbe truncated".to_vec(),
            provider("com/x/impl/Foo", &["com/x/Api"], &["com/x/Api"]),
        ],
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, BuildError::GenerationFailed { errors: 1 }));
}
