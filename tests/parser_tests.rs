//! Binary decoder and validation tests.

mod common;

use common::*;
use wazm::parser::{LoadError, ReadOptions};
use wazm::runtime::Environment;

fn load(bytes: &[u8]) -> Result<(), LoadError> {
    let mut env = Environment::new();
    env.load_module("m", bytes).map(|_| ())
}

#[test]
fn test_empty_module() {
    let b = ModuleBuilder::new();
    assert!(load(&b.build()).is_ok());
}

#[test]
fn test_bad_magic() {
    let bytes = [0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00];
    assert!(matches!(load(&bytes), Err(LoadError::BadMagic(_))));
}

#[test]
fn test_bad_version() {
    let bytes = [0x00, 0x61, 0x73, 0x6d, 0x02, 0x00, 0x00, 0x00];
    assert!(matches!(load(&bytes), Err(LoadError::BadVersion(2))));
}

#[test]
fn test_truncated_header() {
    assert!(load(&[0x00, 0x61, 0x73]).is_err());
}

#[test]
fn test_truncated_section() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.push(1); // type section id
    bytes.push(100); // declared size overruns the input
    assert!(load(&bytes).is_err());
}

#[test]
fn test_section_out_of_order() {
    let mut bytes = ModuleBuilder::new().build();
    // Function section (3) before type section (1).
    bytes.extend_from_slice(&[3, 1, 0]);
    bytes.extend_from_slice(&[1, 1, 0]);
    assert!(matches!(load(&bytes), Err(LoadError::SectionOutOfOrder(1))));
}

#[test]
fn test_duplicate_section() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 1, 0]);
    bytes.extend_from_slice(&[1, 1, 0]);
    assert!(matches!(load(&bytes), Err(LoadError::SectionOutOfOrder(1))));
}

#[test]
fn test_unknown_section_id() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[12, 1, 0]);
    assert!(matches!(load(&bytes), Err(LoadError::UnknownSection(12))));
}

#[test]
fn test_bad_function_type_form() {
    let mut bytes = ModuleBuilder::new().build();
    // Type section with a single entry that does not start with 0x60.
    bytes.extend_from_slice(&[1, 4, 1, 0x5f, 0, 0]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_multiple_results_rejected() {
    let mut bytes = ModuleBuilder::new().build();
    // (i32) -> (i32, i32) is not Wasm 1.0.
    bytes.extend_from_slice(&[1, 7, 1, 0x60, 1, I32, 2, I32, I32]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_invalid_value_type() {
    let mut bytes = ModuleBuilder::new().build();
    // v128 (0x7b) is out of scope.
    bytes.extend_from_slice(&[1, 5, 1, 0x60, 1, 0x7b, 0]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_invalid_utf8_in_import() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]); // type ()->()
    // Import with a lone continuation byte as the module name.
    bytes.extend_from_slice(&[2, 6, 1, 1, 0xbf, 1, b'f', 0x00]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_function_signature_index_out_of_range() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
    bytes.extend_from_slice(&[3, 2, 1, 9]); // function with type index 9
    assert!(load(&bytes).is_err());
}

#[test]
fn test_code_count_mismatch() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
    bytes.extend_from_slice(&[3, 2, 1, 0]); // one declared function
    bytes.extend_from_slice(&[10, 1, 0]); // zero bodies
    assert!(load(&bytes).is_err());
}

#[test]
fn test_missing_code_section() {
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 4, 1, 0x60, 0, 0]);
    bytes.extend_from_slice(&[3, 2, 1, 0]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_export_index_out_of_range() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x0b]);
    b.export_func("f", 5);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_duplicate_export_name() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let f = b.add_func(t, &[], &[0x0b]);
    b.export_func("f", f);
    b.export_func("f", f);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_multiple_memories_rejected() {
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    b.add_memory(1, None);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_multiple_tables_rejected() {
    let mut b = ModuleBuilder::new();
    b.add_table(1, None);
    b.add_table(1, None);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_memory_too_many_pages() {
    let mut b = ModuleBuilder::new();
    b.add_memory(65537, None);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_limits_initial_above_max() {
    let mut b = ModuleBuilder::new();
    b.add_memory(2, Some(1));
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_start_index_out_of_range() {
    let mut b = ModuleBuilder::new();
    b.set_start(0);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_global_init_get_global_must_be_import() {
    let mut b = ModuleBuilder::new();
    b.add_global(I32, false, &[0x41, 0x01]);
    // Second global initialized from the first, which is not an import.
    b.add_global(I32, false, &[0x23, 0x00]);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_global_init_type_mismatch() {
    let mut b = ModuleBuilder::new();
    b.add_global(I32, false, &[0x42, 0x01]); // i64.const into an i32 global
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_set_immutable_global_rejected() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_global(I32, false, &[0x41, 0x01]);
    b.add_func(t, &[], &[0x41, 0x02, 0x24, 0x00, 0x0b]); // set_global 0
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_body_type_mismatch() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F32], &[I32]);
    // i32.add on an f32 operand.
    b.add_func(t, &[], &[0x20, 0x00, 0x41, 0x01, 0x6a, 0x0b]);
    assert!(matches!(load(&b.build()), Err(LoadError::Type(_))));
}

#[test]
fn test_body_stack_underflow() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x6a, 0x0b]); // i32.add on an empty stack
    assert!(matches!(load(&b.build()), Err(LoadError::Type(_))));
}

#[test]
fn test_missing_result_value() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.add_func(t, &[], &[0x0b]);
    assert!(matches!(load(&b.build()), Err(LoadError::Type(_))));
}

#[test]
fn test_branch_depth_out_of_range() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x0c, 0x05, 0x0b]); // br 5
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_local_index_out_of_range() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[]);
    b.add_func(t, &[(1, I64)], &[0x20, 0x02, 0x1a, 0x0b]); // only locals 0..1 exist
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_if_with_result_requires_else() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    b.add_func(t, &[], &[0x20, 0x00, 0x04, 0x7f, 0x41, 0x01, 0x0b, 0x0b]);
    assert!(matches!(load(&b.build()), Err(LoadError::Type(_))));
}

#[test]
fn test_unterminated_body() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x01]); // nop, no end
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_unknown_opcode() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x06, 0x0b]); // 0x06 is unassigned
    assert!(matches!(load(&b.build()), Err(LoadError::UnknownOpcode { .. })));
}

#[test]
fn test_memory_op_without_memory() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.add_func(t, &[], &[0x41, 0x00, 0x28, 0x02, 0x00, 0x0b]);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_call_indirect_without_table() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x41, 0x00, 0x11, 0x00, 0x00, 0x0b]);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_atomic_alignment_must_be_natural() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.add_memory(1, None);
    // i32.atomic.load with align 1 instead of 2.
    b.add_func(t, &[], &[0x41, 0x00, 0xfe, 0x10, 0x01, 0x00, 0x0b]);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_over_aligned_plain_load_is_accepted() {
    // Non-atomic alignment violations are a warning, not an error.
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.add_memory(1, None);
    b.add_func(t, &[], &[0x41, 0x00, 0x28, 0x05, 0x00, 0x0b]);
    assert!(load(&b.build()).is_ok());
}

#[test]
fn test_element_type_must_be_anyfunc() {
    let mut bytes = ModuleBuilder::new().build();
    // Table section with element type 0x6f.
    bytes.extend_from_slice(&[4, 4, 1, 0x6f, 0x00, 1]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_elem_function_index_out_of_range() {
    let mut b = ModuleBuilder::new();
    b.add_table(1, None);
    b.add_elem(0, &[3]);
    assert!(load(&b.build()).is_err());
}

#[test]
fn test_shared_memory_requires_max() {
    let mut bytes = ModuleBuilder::new().build();
    // Memory section, flags 0x02 (shared, no max).
    bytes.extend_from_slice(&[5, 3, 1, 0x02, 1]);
    assert!(load(&bytes).is_err());
}

#[test]
fn test_custom_section_is_skipped() {
    let mut bytes = ModuleBuilder::new().build();
    let mut payload = vec![5, b'h', b'e', b'l', b'l', b'o'];
    payload.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    bytes.push(0);
    bytes.extend(uleb(payload.len() as u32));
    bytes.extend_from_slice(&payload);
    assert!(load(&bytes).is_ok());
}

#[test]
fn test_name_section_function_names() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.add_func(t, &[], &[0x0b]);
    let mut bytes = b.build();

    // Custom "name" section: subsection 1 (function names), one entry.
    let mut sub = uleb(1); // count
    sub.extend(uleb(0)); // function index
    sub.extend(uleb(4));
    sub.extend_from_slice(b"main");
    let mut payload = vec![4, b'n', b'a', b'm', b'e', 1];
    payload.extend(uleb(sub.len() as u32));
    payload.extend_from_slice(&sub);
    bytes.push(0);
    bytes.extend(uleb(payload.len() as u32));
    bytes.extend_from_slice(&payload);

    let mut env = Environment::new();
    let module = env.load_module("m", &bytes).unwrap();
    assert_eq!(module.func_names.get(&0).map(String::as_str), Some("main"));
    assert_eq!(module.func_name(0), Some("main"));
}

#[test]
fn test_continue_past_failed_section() {
    // With stop_on_first_error off the reader skips a broken section and
    // still fails at the end.
    let mut bytes = ModuleBuilder::new().build();
    bytes.extend_from_slice(&[1, 4, 1, 0x5f, 0, 0]); // bad type form
    bytes.extend_from_slice(&[3, 2, 1, 0]); // function referencing type 0
    let mut env = Environment::new();
    let options = ReadOptions {
        stop_on_first_error: false,
    };
    assert!(env.load_module_with("m", &bytes, &options).is_err());
}

#[test]
fn test_dump_details() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x0b]);
    b.export_func("id", f);
    b.add_memory(1, None);
    let mut env = Environment::new();
    let module = env.load_module("m", &b.build()).unwrap();
    let details = module.to_details_string();
    assert!(details.contains("type[0] (i32) -> i32"));
    assert!(details.contains("\"id\""));
    assert!(details.contains("memory[0]"));
}
