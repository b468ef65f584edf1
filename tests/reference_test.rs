mod common;

use common::{point_layout, runtime, runtime_with, throws_range_error, throws_type_error};
use native_bridge_v8::BridgeConfig;

#[test]
fn test_uint8_wraps_like_c() {
    let mut rt = runtime();

    let value = rt
        .eval_number(
            r#"
            const bytes = new Reference(interop.types.uint8, 4);
            bytes[0] = 300;
            bytes[0]
            "#,
        )
        .unwrap();

    assert_eq!(value, 44.0);
}

#[test]
fn test_signed_and_float_elements() {
    let mut rt = runtime();

    assert_eq!(
        rt.eval_number("const a = new Reference(interop.types.int8, 1); a[0] = 200; a[0]")
            .unwrap(),
        -56.0
    );
    assert_eq!(
        rt.eval_number("const b = new Reference(interop.types.double, 2); b[1] = 1.5; b[1] + b[0]")
            .unwrap(),
        1.5
    );
    assert_eq!(
        rt.eval_number("const c = new Reference('int32'); c.value = -7.9; c.value")
            .unwrap(),
        -7.0
    );
}

#[test]
fn test_fresh_memory_is_zeroed() {
    let mut rt = runtime();

    let all_zero = rt
        .eval_bool(
            r#"
            const r = new Reference(interop.types.int64, 32);
            let ok = true;
            for (let i = 0; i < 32; i++) ok = ok && r[i] === 0;
            ok
            "#,
        )
        .unwrap();

    assert!(all_zero);
}

#[test]
fn test_64_bit_values_beyond_safe_integers() {
    let mut rt = runtime();

    let text = rt
        .eval_to_string(
            r#"
            const wide = new Reference(interop.types.uint64, 1);
            wide[0] = 0xffffffffffffffffn;
            String(wide[0])
            "#,
        )
        .unwrap();
    assert_eq!(text, "18446744073709551615");

    let negative = rt
        .eval_number("const neg = new Reference(interop.types.int64, 1); neg[0] = -1n; neg[0]")
        .unwrap();
    assert_eq!(negative, -1.0);

    assert!(
        rt.eval_bool("typeof wide[0] === 'bigint' && typeof neg[0] === 'number'")
            .unwrap()
    );
}

#[test]
fn test_bool_elements_are_strict() {
    let mut rt = runtime();

    // Non-numbers only store true for `true` itself or a boxed `true`;
    // numbers use their truthiness.
    let result = rt
        .eval_to_string(
            r#"
            const flags = new Reference(interop.types.bool, 6);
            flags[0] = 'yes';
            flags[1] = 0;
            flags[2] = 5;
            flags[3] = true;
            flags[4] = new Boolean(true);
            flags[5] = {};
            [flags[0], flags[1], flags[2], flags[3], flags[4], flags[5]].join(',')
            "#,
        )
        .unwrap();

    assert_eq!(result, "false,false,true,true,true,false");
}

#[test]
fn test_boxed_primitives_are_unwrapped() {
    let mut rt = runtime();

    assert_eq!(
        rt.eval_number("const n = new Reference(interop.types.int32, 1); n[0] = new Number(7); n[0]")
            .unwrap(),
        7.0
    );

    let ok = rt
        .eval_bool(
            r#"
            const text = new Reference('unichar', 4);
            text.value = new String('hi');
            text[0] === 'h' && text[1] === 'i' && text[2] === '\0'
            "#,
        )
        .unwrap();
    assert!(ok);
}

#[test]
fn test_throwing_conversions_degrade_silently() {
    let mut rt = runtime();

    // valueOf throws: NaN, stored as 0 in an integer slot.
    let value = rt
        .eval_number(
            r#"
            const slot = new Reference(interop.types.int32, 1);
            slot[0] = 5;
            slot[0] = { valueOf() { throw new Error('nope'); } };
            slot[0]
            "#,
        )
        .unwrap();
    assert_eq!(value, 0.0);

    assert!(
        rt.eval_bool(
            r#"
            const d = new Reference(interop.types.double, 1);
            d[0] = { valueOf() { throw 1; } };
            Number.isNaN(d[0])
            "#
        )
        .unwrap()
    );

    // A boxed string stores its primitive value; an overridden toString is never called.
    let ok = rt
        .eval_bool(
            r#"
            const chars = new Reference(interop.types.unichar, 4);
            chars[0] = 'x';
            chars.value = Object.assign(new String('ignored'), { toString() { throw 1; } });
            chars[0] === 'i'
            "#,
        )
        .unwrap();
    assert!(ok);
}

#[test]
fn test_last_index_ok_next_index_out_of_range() {
    let mut rt = runtime();

    rt.evaluate("globalThis.r = new Reference(interop.types.int32, 3);")
        .unwrap();

    assert_eq!(rt.eval_number("r[2] = 7; r[2]").unwrap(), 7.0);
    assert!(throws_range_error(&mut rt, "r[3]"));
    assert!(throws_range_error(&mut rt, "r[3] = 1"));
}

#[test]
fn test_invalid_constructor_arguments() {
    let mut rt = runtime();

    assert!(throws_type_error(&mut rt, "new Reference(interop.types.int32, 0)"));
    assert!(throws_type_error(&mut rt, "new Reference(interop.types.int32, -1)"));
    assert!(throws_type_error(&mut rt, "new Reference(interop.types.int32, 1.5)"));
    assert!(throws_type_error(&mut rt, "new Reference('nope', 1)"));
    assert!(throws_type_error(&mut rt, "new Reference({}, 1)"));
    assert!(throws_type_error(&mut rt, "new Reference(interop.types.int32, {})"));
    assert!(throws_type_error(&mut rt, "Reference(interop.types.int32, 1)"));

    // No memory was taken for any of them.
    assert_eq!(rt.stats().regions_allocated, 0);
}

#[test]
fn test_struct_fields_and_value() {
    let mut rt = runtime_with(BridgeConfig::default().with_struct(point_layout()));

    let sum = rt
        .eval_number(
            r#"
            const p = new Reference(interop.types.Point);
            p.x = 3;
            p.y = -4;
            p.value.x + p.value.y * 10
            "#,
        )
        .unwrap();
    assert_eq!(sum, -37.0);

    let assigned = rt
        .eval_number("p.value = { x: 9, y: 8 }; p.x * 10 + p.y")
        .unwrap();
    assert_eq!(assigned, 98.0);

    // Missing keys leave the field alone.
    assert_eq!(rt.eval_number("p.value = { y: 1 }; p.x").unwrap(), 9.0);

    assert_eq!(rt.eval_number("interop.sizeof(interop.types.Point)").unwrap(), 8.0);
}

#[test]
fn test_struct_element_views_alias_parent() {
    let mut rt = runtime_with(BridgeConfig::default().with_struct(point_layout()));

    let result = rt
        .eval_to_string(
            r#"
            const points = new Reference('Point', 2);
            points[1] = { x: 1, y: 2 };
            const view = points[1];
            view.x = 5;
            [points[1].x, points[1].y, points[0].x].join(',')
            "#,
        )
        .unwrap();

    assert_eq!(result, "5,2,0");
}

#[test]
fn test_struct_view_keeps_parent_alive() {
    let mut rt = runtime_with(BridgeConfig::default().with_struct(point_layout()));

    rt.evaluate(
        r#"
        globalThis.view = (() => {
            const points = new Reference('Point', 4);
            points[3] = { x: 11, y: 12 };
            return points[3];
        })();
        "#,
    )
    .unwrap();

    rt.collect_garbage();

    assert_eq!(rt.stats().regions_freed, 0);
    assert_eq!(rt.eval_number("view.x + view.y").unwrap(), 23.0);
}

#[test]
fn test_unichar_string_assignment() {
    let mut rt = runtime();

    let ok = rt
        .eval_bool(
            r#"
            const text = new Reference(interop.types.unichar, 8);
            text.value = 'hi';
            text[0] === 'h' && text[1] === 'i' && text[2] === '\0'
            "#,
        )
        .unwrap();
    assert!(ok);

    // Truncated to capacity, no terminator.
    let truncated = rt
        .eval_to_string(
            r#"
            const small = new Reference(interop.types.unichar, 2);
            small.value = 'abc';
            small[0] + small[1]
            "#,
        )
        .unwrap();
    assert_eq!(truncated, "ab");
}

#[test]
fn test_to_string_formats() {
    let mut rt = runtime();

    assert_eq!(
        rt.eval_to_string("const one = new Reference(interop.types.int32, 1); one[0] = 42; String(one)")
            .unwrap(),
        "42"
    );

    let many = rt
        .eval_to_string("globalThis.many = new Reference(interop.types.int32, 4); String(many)")
        .unwrap();
    assert!(many.starts_with("<Reference: 0x"), "{many}");
    assert!(many.ends_with(" int32>"), "{many}");
}

#[test]
fn test_detached_reference_is_fail_soft() {
    let mut rt = runtime();

    rt.evaluate("globalThis.r = new Reference(interop.types.int32, 4); r[0] = 1;")
        .unwrap();

    assert!(rt.detach("r"));
    assert!(!rt.detach("r"));

    let stats = rt.stats();
    assert_eq!(stats.wrappers_detached, 1);
    assert_eq!(stats.regions_live(), 0);

    assert_eq!(rt.eval_to_string("String(r)").unwrap(), "<Reference: detached>");
    assert!(rt.eval_bool("r[0] === undefined && r.value === undefined").unwrap());
    // Writes are dropped without throwing.
    rt.evaluate("r[0] = 5; r.value = 6;").unwrap();
}

#[test]
fn test_owned_memory_freed_on_collection() {
    let mut rt = runtime();

    rt.evaluate("globalThis.keep = new Reference(interop.types.double, 4);")
        .unwrap();
    rt.evaluate(
        r#"
        (() => {
            for (let i = 0; i < 8; i++) {
                new Reference(interop.types.double, 16);
            }
        })();
        "#,
    )
    .unwrap();

    assert_eq!(rt.stats().regions_allocated, 9);

    rt.collect_garbage();

    let stats = rt.stats();
    assert_eq!(stats.regions_freed, 8);
    assert_eq!(stats.regions_live(), 1);
    assert_eq!(stats.region_bytes_live, 4 * 8);

    rt.evaluate("keep = null;").unwrap();
    rt.collect_garbage();

    assert_eq!(rt.stats().regions_live(), 0);
    assert_eq!(rt.stats().region_bytes_live, 0);
}

#[test]
fn test_borrowed_memory_by_address() {
    let mut backing: Vec<i32> = vec![1, 2, 3, 4];
    let address = backing.as_mut_ptr() as usize;

    {
        let mut rt = runtime();

        let sum = rt
            .eval_number(&format!(
                "globalThis.view = new Reference(interop.types.int32, {address}n); view[2] = 30; view[0] + view[1]"
            ))
            .unwrap();
        assert_eq!(sum, 3.0);

        assert!(
            rt.eval_bool(&format!("interop.handleof(view).toBigInt() === {address}n"))
                .unwrap()
        );

        rt.evaluate("view = null;").unwrap();
        rt.collect_garbage();

        let stats = rt.stats();
        assert_eq!(stats.regions_allocated, 0);
        assert_eq!(stats.regions_freed, 0);
    }

    assert_eq!(backing, vec![1, 2, 30, 4]);
}

#[test]
fn test_expose_borrowed_is_bounded() {
    let mut backing: [u16; 3] = [10, 20, 30];

    {
        let mut rt = runtime();

        unsafe {
            rt.expose_borrowed("shared", "uint16", backing.as_mut_ptr().cast(), Some(3))
                .unwrap();
        }

        assert_eq!(rt.eval_number("shared[1] = 65537; shared[1]").unwrap(), 1.0);
        assert!(throws_range_error(&mut rt, "shared[3]"));

        let missing = unsafe { rt.expose_borrowed("other", "no-such-type", backing.as_mut_ptr().cast(), None) };
        assert!(missing.is_err());
    }

    assert_eq!(backing, [10, 1, 30]);
}

#[test]
fn test_reference_aliasing_another_reference() {
    let mut rt = runtime();

    let value = rt
        .eval_number(
            r#"
            const words = new Reference(interop.types.uint32, 1);
            words[0] = 0x01020304;
            const bytes = new Reference(interop.types.uint8, words);
            bytes[0] + bytes[1] + bytes[2] + bytes[3]
            "#,
        )
        .unwrap();

    assert_eq!(value, 10.0);
}

#[test]
fn test_alias_keeps_owner_alive() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        globalThis.alias = (() => {
            const owner = new Reference(interop.types.uint8, 4096);
            owner[10] = 77;
            return new Reference(interop.types.uint8, owner);
        })();
        "#,
    )
    .unwrap();

    rt.collect_garbage();

    assert_eq!(rt.stats().regions_freed, 0);
    assert_eq!(rt.eval_number("alias[0] = 1; alias[0] + alias[10]").unwrap(), 78.0);

    // Once the alias goes, so does the owner.
    rt.evaluate("alias = null;").unwrap();
    rt.collect_garbage();

    assert_eq!(rt.stats().regions_freed, 1);
    assert_eq!(rt.stats().regions_live(), 0);
}

#[test]
fn test_derived_pointers_keep_owner_alive() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        globalThis.cursor = (() => {
            const owner = new Reference(interop.types.int16, 8);
            owner[3] = -9;
            return interop.handleof(owner).add(6);
        })();
        "#,
    )
    .unwrap();

    rt.collect_garbage();

    assert_eq!(rt.stats().regions_freed, 0);
    assert_eq!(
        rt.eval_number("new Reference(interop.types.int16, cursor)[0]")
            .unwrap(),
        -9.0
    );

    rt.evaluate("cursor = null;").unwrap();
    rt.collect_garbage();

    assert_eq!(rt.stats().regions_live(), 0);
}

#[test]
fn test_pointer_arithmetic() {
    let mut rt = runtime();

    assert_eq!(
        rt.eval_number("new Pointer(0x1000).add(16).toNumber()").unwrap(),
        4112.0
    );
    assert_eq!(
        rt.eval_number("new Pointer(0x1000).subtract(0x10).toNumber()")
            .unwrap(),
        4080.0
    );
    assert_eq!(
        rt.eval_to_string("String(new Pointer(0x1000))").unwrap(),
        "<Pointer: 0x1000>"
    );
    assert!(rt.eval_bool("new Pointer(255n).toBigInt() === 255n").unwrap());
    assert!(throws_type_error(&mut rt, "new Pointer('x')"));
    assert!(throws_type_error(&mut rt, "Pointer(1)"));
}

#[test]
fn test_pointer_slots_hold_pointers() {
    let mut rt = runtime();

    let result = rt
        .eval_to_string(
            r#"
            const slots = new Reference(interop.types.pointer, 2);
            slots[0] = new Pointer(0x2000);
            [String(slots[0]), String(slots[1])].join(' ')
            "#,
        )
        .unwrap();

    assert_eq!(result, "<Pointer: 0x2000> null");
}

#[test]
fn test_interop_sizeof_and_handleof() {
    let mut rt = runtime();

    assert_eq!(rt.eval_number("interop.sizeof(interop.types.int16)").unwrap(), 2.0);
    assert_eq!(rt.eval_number("interop.sizeof('double')").unwrap(), 8.0);
    assert_eq!(
        rt.eval_number("interop.sizeof(new Reference(interop.types.float, 3))")
            .unwrap(),
        4.0
    );
    assert_eq!(
        rt.eval_number("interop.types.uint64.size").unwrap(),
        8.0
    );
    assert_eq!(
        rt.eval_to_string("interop.types.unichar.name").unwrap(),
        "unichar"
    );

    assert!(
        rt.eval_bool(
            r#"
            const p = new Pointer(64);
            const r = new Reference(interop.types.int8, 2);
            interop.handleof(p) === p
                && interop.handleof(r) instanceof Pointer
                && interop.handleof(r).toNumber() === interop.handleof(r).toNumber()
            "#
        )
        .unwrap()
    );

    assert!(throws_type_error(&mut rt, "interop.handleof({})"));
    assert!(throws_type_error(&mut rt, "interop.sizeof('nope')"));
    assert!(rt.eval_bool("interop.Reference === Reference").unwrap());
}
