//! Server streaming followed by client hydration.

use arbor::{
    Patch,
    dom::{Hydrator, Runtime, patch_queue, scripted_patches},
    prelude::*,
};
use futures::{FutureExt, TryStreamExt, executor::block_on, stream};

fn later(text: &'static str) -> AsyncComponent {
    AsyncComponent::future("later", move |_: Args| async move {
        Ok::<_, Error>(Node::from(h("em").child(text)))
    })
    .with_fallback("loading")
}

fn ticker() -> AsyncComponent {
    AsyncComponent::stream("ticker", |_: Args| {
        stream::iter([
            Ok::<_, Error>(Step::Yield(Node::from("tick 1"))),
            Ok(Step::Yield(Node::from("tick 2"))),
            Ok(Step::Return(Node::from("done"))),
        ])
    })
}

fn nested() -> AsyncComponent {
    AsyncComponent::future("nested", |_: Args| async {
        Ok::<_, Error>(h("section").child(h(later("inner"))).into())
    })
}

/// Streams `tree` and loads every chunk into a fresh document.
fn serve(tree: impl Into<Node>) -> (Runtime, Vec<Patch>) {
    let chunks: Vec<String> =
        block_on(ssr::stream(tree.into()).try_collect()).expect("stream renders");
    let mut runtime = Runtime::new();
    let body = runtime.document().body();
    runtime
        .document_mut()
        .set_inner_html(body, &chunks.concat())
        .expect("markup parses");
    let patches = scripted_patches(runtime.document(), body, "$stream").expect("patches decode");
    runtime.document_mut().record_mutations(true);
    (runtime, patches)
}

fn placeholder_text(runtime: &Runtime, id: &str) -> String {
    let node = runtime
        .document()
        .query_attribute("data-ssr", id)
        .expect("placeholder exists");
    runtime.document().text_content(node)
}

#[test]
fn streamed_markup_hydrates_into_final_content() {
    let (mut rt, patches) = serve(h("main").child(h(later("late"))).child(h(ticker())));
    assert_eq!(placeholder_text(&rt, "0"), "loading");
    assert_eq!(placeholder_text(&rt, "1"), "");
    assert_eq!(patches.len(), 4);

    let mut hydrator = Hydrator::new();
    for patch in patches {
        block_on(hydrator.hydrate(&mut rt, patch)).expect("hydrates");
    }

    assert!(hydrator.pending().is_empty());
    assert_eq!(placeholder_text(&rt, "0"), "late");
    assert_eq!(placeholder_text(&rt, "1"), "done");
}

#[test]
fn nested_patches_hydrate_in_any_order() {
    let (mut rt, patches) = serve(h("main").child(h(nested())));
    let ids: Vec<&str> = patches.iter().map(|patch| patch.id.as_str()).collect();
    assert_eq!(ids, ["0", "0:0"]);

    let mut hydrator = Hydrator::new();
    for patch in patches.into_iter().rev() {
        block_on(hydrator.hydrate(&mut rt, patch)).expect("hydrates");
    }

    assert!(hydrator.pending().is_empty());
    assert_eq!(placeholder_text(&rt, "0:0"), "inner");
    let outer = rt
        .document()
        .query_attribute("data-ssr", "0")
        .expect("placeholder exists");
    assert_eq!(
        rt.document().inner_html(outer),
        r#"<section><div data-ssr="0:0"><em>inner</em></div></section>"#
    );
}

#[test]
fn reapplying_a_patch_changes_nothing() {
    let (mut rt, patches) = serve(h(later("once")));
    let patch = patches.into_iter().next().expect("one patch");
    let mut hydrator = Hydrator::new();

    block_on(hydrator.hydrate(&mut rt, patch.clone())).expect("hydrates");
    assert!(!rt.document_mut().take_mutations().is_empty());

    block_on(hydrator.hydrate(&mut rt, patch)).expect("hydrates again");
    assert_eq!(rt.document_mut().take_mutations(), []);
}

#[test]
fn patches_for_missing_placeholders_change_nothing() {
    let (mut rt, _) = serve(h("main").child("static"));
    let before = rt.document().inner_html(rt.document().body());
    let mut hydrator = Hydrator::new();

    block_on(hydrator.hydrate(&mut rt, Patch::new("7", "stray"))).expect("buffered");

    assert_eq!(hydrator.pending().len(), 1);
    assert_eq!(rt.document_mut().take_mutations(), []);
    assert_eq!(rt.document().inner_html(rt.document().body()), before);
}

#[test]
fn islands_hydrate_with_their_server_arguments() {
    let greeting = Stateful::builder("greeting", |_| {
        render_loop(|scope| {
            let name = scope.args().str("name").unwrap_or("nobody").to_owned();
            Ok(h("b").child(format!("Hello, {name}")).into())
        })
    })
    .src("/greeting.js")
    .fallback("…")
    .build()
    .expect("valid component");

    let (mut rt, patches) = serve(h("main").child(h(&greeting).attr("name", "Ada")));
    assert_eq!(placeholder_text(&rt, "0"), "…");
    assert_eq!(patches[0].src.as_deref(), Some("/greeting.js"));

    let loader = move |_: &str| {
        let component = greeting.clone();
        async move { Ok::<_, Error>(component) }.boxed_local()
    };
    let mut hydrator = Hydrator::new().with_loader(loader);
    for patch in patches {
        block_on(hydrator.hydrate(&mut rt, patch)).expect("hydrates");
    }
    assert_eq!(placeholder_text(&rt, "0"), "Hello, Ada");
}

#[test]
fn queued_patches_are_applied_in_arrival_order() {
    let (mut rt, patches) = serve(h("main").child(h(ticker())));
    let (queue, receiver) = patch_queue();
    for patch in patches {
        assert!(queue.push(patch));
    }
    queue.close();

    let mut hydrator = Hydrator::new();
    block_on(hydrator.run(&mut rt, receiver)).expect("hydrates");
    assert_eq!(placeholder_text(&rt, "0"), "done");
}
