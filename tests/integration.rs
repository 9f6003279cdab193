use nanofuzz::error::GenerationError;
use nanofuzz::Fuzzer;

fn generate(schema: &str, seed: u64, pool_size: usize) -> Vec<u8> {
    let mut fuzzer = Fuzzer::new(schema.as_bytes(), seed, pool_size).unwrap();
    fuzzer.next().unwrap().to_vec()
}

#[test]
fn test_many_seed_independent_scenarios() {
    const SEEDS: &[u64] = &[0, 1, 42, 9999];

    for &seed in SEEDS {
        assert_eq!(generate("aaaaa", seed, 64), b"aaaaa");

        let out = generate("a{1,3}bcd", seed, 64);
        assert!((4..=6).contains(&out.len()));
        assert!(out.ends_with(b"bcd"));
        assert!(out[..out.len() - 3].iter().all(|&b| b == b'a'));

        assert_eq!(generate(r"\r\n\x37\f\s", seed, 64), [0x0D, 0x0A, 0x37, 0x0C, 0x20]);

        let out = generate("[A-Z]{3}-[0-9]{4}", seed, 64);
        assert_eq!(out.len(), 8);
        assert!((b'A'..=b'Z').contains(&out[0]));
        assert_eq!(out[4], b'-');
        assert!(out[5..8].iter().all(|b| (b'0'..=b'9').contains(b)));

        assert_eq!(generate("(ab){2}", seed, 64), b"abab");
        assert_eq!(generate("(ab){0,0}cd", seed, 64), b"cd");
    }
}

#[test]
fn overflow_scenario_is_recoverable() {
    let schema = b"(abc(def(ghi(jkl){65535}){65535}){65535}){65535}";
    let mut fuzzer = Fuzzer::new(schema, 1, 1024 * 1024).unwrap();
    assert!(matches!(
        fuzzer.next(),
        Err(nanofuzz::NanofuzzError::Generation(GenerationError::PoolExceeded))
    ));
    // The same generator must still work afterwards, with no leftover state
    // from the aborted draw.
    let mut plain = Fuzzer::new(b"ok", 1, 64).unwrap();
    assert_eq!(plain.next().unwrap(), b"ok");
    assert!(matches!(
        fuzzer.next(),
        Err(nanofuzz::NanofuzzError::Generation(GenerationError::PoolExceeded))
    ));
}

#[test]
fn dead_schemas_fail_to_compile() {
    const DEAD: &[&str] = &[
        "a(bcd",
        "a{3,bcd",
        "123[A-Z456",
        "a{,0}bcd",
        "a{3,a}bcd",
        "a)bcd",
        "a>bcd",
        "}abcd",
    ];
    for schema in DEAD {
        let err = Fuzzer::new(schema.as_bytes(), 1, 1024).unwrap_err();
        assert!(matches!(err, nanofuzz::NanofuzzError::Compile(_)), "{schema} should fail");
    }
}

#[test]
fn boundary_behaviors() {
    // {65534,65535} accepted, {65535,65535} rejected.
    assert!(Fuzzer::new(b"a{65534,65535}", 1, 1 << 20).is_ok());
    assert!(Fuzzer::new(b"a{65535,65535}", 1, 1 << 20).is_err());

    // Nesting exactly 5 accepted, 6 rejected.
    assert!(Fuzzer::new(b"(((((a)))))", 1, 64).is_ok());
    assert!(Fuzzer::new(b"((((((a))))))", 1, 64).is_err());

    // Label exactly 8 chars accepted, 9 rejected.
    assert!(Fuzzer::new(b"(a)<$ABCDEFGH>", 1, 64).is_ok());
    assert!(Fuzzer::new(b"(a)<$ABCDEFGHI>", 1, 64).is_err());
}

#[test]
fn determinism_same_seed_same_bytes() {
    let schema = b"[a-z]{5,10}(foo|bar){1,2}<$L>-<@L>-<#L>";
    let mut a = Fuzzer::new(schema, 777, 512).unwrap();
    let mut b = Fuzzer::new(schema, 777, 512).unwrap();
    for _ in 0..20 {
        assert_eq!(a.next().unwrap(), b.next().unwrap());
    }
}

#[test]
fn next_to_stream_matches_next() {
    let schema = b"[A-F0-9]{16}";
    let mut a = Fuzzer::new(schema, 5, 256).unwrap();
    let mut b = Fuzzer::new(schema, 5, 256).unwrap();
    let direct = a.next().unwrap().to_vec();
    let mut streamed = Vec::new();
    b.next_to_stream(&mut streamed).unwrap();
    assert_eq!(direct, streamed);
}

#[test]
fn alternation_only_produces_declared_arms() {
    let mut fuzzer = Fuzzer::new(b"(cat|dog|bird)", 3, 64).unwrap();
    for _ in 0..50 {
        let out = fuzzer.next().unwrap();
        assert!(matches!(out, b"cat" | b"dog" | b"bird"));
    }
}

#[test]
fn shuffle_reference_emits_nothing_but_refreshes_paste() {
    // <%L> never contributes bytes itself; it only refreshes what the next
    // <@L> pastes. A second <%L> in the same draw is a no-op (spec.md
    // §4.4: "at most once per `next` per subcontext").
    let mut fuzzer = Fuzzer::new(b"([a-z]{16}){1}<$L><%L>x<%L><@L>", 1, 256).unwrap();
    let out = fuzzer.next().unwrap().to_vec();
    // 16 inline (declaration body) + 1 'x' + 16 pasted after the shuffles.
    assert_eq!(out.len(), 16 + 1 + 16);
    assert!(out[16..17] == *b"x");
    assert!(out[17..].iter().all(|b| (b'a'..=b'z').contains(b)));
}
