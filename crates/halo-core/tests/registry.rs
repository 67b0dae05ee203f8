mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use halo_core::{BackendInit, EngineConfig, END_SENTINEL, ERROR_SENTINEL, ModelMetadata, SessionId, SessionRegistry};

fn registry(rt: &MockRuntime) -> SessionRegistry<MockRuntime> {
    SessionRegistry::with_backend(rt.clone(), Arc::new(BackendInit::new()))
}

#[test]
fn full_boundary_round_trip() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();

    assert!(!reg.is_ready(id));
    assert!(reg.load(id, "mock.gguf", 2, 2048, 0.8, true));
    assert!(reg.is_ready(id));
    assert_eq!(reg.model_info(id), "Context: 2048 | Vocab: 259 | Threads: 2");

    rt.reply("Hi!");
    assert!(reg.start_completion(id, "hello"));
    let mut out = String::new();
    let mut steps = 0;
    loop {
        let s = reg.step(id);
        if s == END_SENTINEL {
            break;
        }
        assert_ne!(s, ERROR_SENTINEL);
        out.push_str(&s);
        steps += 1;
        assert!(steps <= 256);
    }
    assert_eq!(out, "Hi!");
    assert_eq!(reg.step(id), END_SENTINEL);
    assert_eq!(reg.stop_completion(id), "Hi!");
    assert!(reg.context_used(id) > 0);
    assert!(reg.generation_rate(id) >= 0.0);

    assert!(reg.unload(id));
    assert!(!reg.is_ready(id));
    assert_eq!(reg.context_used(id), 0);
    assert!(reg.release(id));
    assert!(reg.is_empty());
}

#[test]
fn unknown_ids_fail_cleanly() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let ghost = SessionId(42);

    assert!(!reg.load(ghost, "mock.gguf", 1, 512, 0.5, true));
    assert!(!reg.is_ready(ghost));
    assert!(!reg.add_message(ghost, "x", "user"));
    assert!(!reg.clear_messages(ghost));
    assert!(!reg.start_fresh_conversation(ghost));
    assert!(!reg.start_completion(ghost, "x"));
    assert_eq!(reg.step(ghost), ERROR_SENTINEL);
    assert_eq!(reg.stop_completion(ghost), "");
    assert_eq!(reg.generation_rate(ghost), 0.0);
    assert_eq!(reg.context_used(ghost), 0);
    assert_eq!(reg.model_info(ghost), "Model not loaded");
    assert!(!reg.unload(ghost));
    assert!(!reg.release(ghost));
    assert_eq!(rt.state().loads, 0);
}

#[test]
fn failures_map_to_neutral_values() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();

    // not loaded yet
    assert!(!reg.start_completion(id, "x"));
    assert_eq!(reg.step(id), ERROR_SENTINEL);

    rt.state().fail_load = true;
    assert!(!reg.load(id, "mock.gguf", 2, 2048, 0.8, true));
    rt.state().fail_load = false;

    assert!(reg.load(id, "mock.gguf", 2, 600, 0.8, true));
    assert!(!reg.start_completion(id, &"x".repeat(300)), "over budget");

    // prompt decode succeeds, the first sampled token fails
    let next = rt.state().decode_calls;
    rt.state().fail_decode_at = Some(next + 1);
    rt.reply("abc");
    assert!(reg.start_completion(id, "ok"));
    assert_eq!(reg.step(id), ERROR_SENTINEL);
    assert!(reg.is_ready(id));
}

#[test]
fn complete_turns_feed_only_the_new_suffix() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();
    assert!(reg.load(id, "mock.gguf", 2, 2048, 0.8, true));

    rt.reply("one");
    let mut streamed = String::new();
    assert_eq!(reg.complete(id, "hi", |p| streamed.push_str(p)).as_deref(), Some("one"));
    assert_eq!(streamed, "one");

    rt.reply("two");
    assert_eq!(reg.complete(id, "again", |_| {}).as_deref(), Some("two"));
    let (text, add_special, _) = rt.state().tokenize_calls.last().cloned().unwrap();
    assert_eq!(text, "<|user|>again\n<|assistant|>");
    assert!(!add_special);

    // A failed generation is still finalized, so the following turn stays incremental.
    let next = rt.state().decode_calls;
    rt.state().fail_decode_at = Some(next + 1);
    rt.reply("abc");
    assert_eq!(reg.complete(id, "boom", |_| {}), None);
    rt.state().replies.clear();

    rt.reply("ok");
    assert_eq!(reg.complete(id, "after", |_| {}).as_deref(), Some("ok"));
    let (text, add_special, _) = rt.state().tokenize_calls.last().cloned().unwrap();
    assert_eq!(text, "<|user|>after\n<|assistant|>");
    assert!(!add_special);
}

#[test]
fn complete_reports_rejected_prompts() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();
    assert_eq!(reg.complete(id, "x", |_| {}), None);
    assert!(reg.load(id, "mock.gguf", 2, 600, 0.8, true));
    assert_eq!(reg.complete(id, &"x".repeat(300), |_| panic!("no fragments expected")), None);
}

#[test]
fn roles_are_parsed_case_insensitively() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();
    assert!(reg.load(id, "mock.gguf", 2, 2048, 0.8, true));

    assert!(reg.add_message(id, "sys", "System"));
    assert!(reg.add_message(id, "q", "USER"));
    assert!(reg.add_message(id, "a", "assistant"));
    assert!(!reg.add_message(id, "?", "narrator"));
    assert!(reg.add_user_message(id, "q2"));

    let n = reg.with_engine(id, |e| e.turns().len()).unwrap();
    assert_eq!(n, 4);

    assert!(reg.clear_messages(id));
    assert_eq!(reg.with_engine(id, |e| e.turns().len()).unwrap(), 0);
}

#[test]
fn load_with_config_honours_every_field() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let id = reg.create();
    let cfg = EngineConfig {
        max_tokens: Some(2),
        system_prompt: Some("sys".into()),
        ..EngineConfig::for_load(2, 1024, 0.1, true)
    };
    assert!(reg.load_with_config(id, "mock.gguf", cfg));

    rt.reply("abcdef");
    assert!(reg.start_completion(id, "x"));
    assert_eq!(reg.step(id), "a");
    assert_eq!(reg.step(id), "b");
    assert_eq!(reg.step(id), END_SENTINEL);
    assert_eq!(reg.with_engine(id, |e| e.turns().len()).unwrap(), 3);
}

#[test]
fn sessions_are_isolated() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);
    let a = reg.create();
    let b = reg.create();
    assert_ne!(a, b);
    assert!(reg.load(a, "a.gguf", 1, 2048, 0.8, true));

    assert!(reg.is_ready(a));
    assert!(!reg.is_ready(b));
    assert!(reg.add_user_message(b, "only in b"));
    assert_eq!(reg.with_engine(a, |e| e.turns().len()).unwrap(), 0);
    assert!(reg.release(a));
    assert!(reg.with_engine(a, |_| ()).is_err());
    assert!(reg.add_user_message(b, "still here"));
}

#[test]
fn ids_are_unique_and_never_zero_across_threads() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);

    let ids: Vec<SessionId> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| (0..25).map(|_| reg.create()).collect::<Vec<_>>()))
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 100);
    assert!(!unique.contains(&SessionId(0)));
    assert_eq!(reg.len(), 100);
}

#[test]
fn metadata_probe_falls_back_to_runtime() {
    let rt = MockRuntime::new();
    let reg = registry(&rt);

    let missing = reg.read_metadata("/no/such/model.gguf");
    assert!(!missing.valid);
    assert_eq!(missing.context_size, 4096);

    let path = std::env::temp_dir().join(format!("halo-registry-{}.bin", std::process::id()));
    std::fs::write(&path, b"not gguf").unwrap();

    let md = reg.read_metadata(&path);
    assert!(!md.valid, "no runtime header scripted");

    rt.state().header = Some(ModelMetadata {
        context_size: 0,
        chat_template: "tpl".into(),
        architecture: "mock".into(),
        valid: true,
    });
    let md = reg.read_metadata(&path);
    std::fs::remove_file(&path).ok();

    assert!(md.valid);
    assert_eq!(md.context_size, 4096);
    assert_eq!(md.architecture, "mock");
    assert!(md.has_chat_template());
}
