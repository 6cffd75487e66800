//! End-to-end rendering into a document.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use arbor::{
    dom::{Event, Mutation, Runtime, on},
    prelude::*,
};

fn runtime() -> (Runtime, NodeId) {
    let mut runtime = Runtime::new();
    runtime.document_mut().record_mutations(true);
    let body = runtime.document().body();
    (runtime, body)
}

#[test]
fn rendering_twice_changes_nothing() {
    let (mut rt, body) = runtime();
    let tree = || {
        h("section")
            .attr("id", "main")
            .attr("hidden", false)
            .child(h("h1").child("Title"))
            .child(
                h("ul").children(
                    ["a", "b"]
                        .into_iter()
                        .map(|item| h("li").key(item).attr("data-item", item).child(item)),
                ),
            )
    };

    rt.render(tree(), body).expect("first render");
    assert!(!rt.document_mut().take_mutations().is_empty());

    rt.render(tree(), body).expect("second render");
    assert_eq!(rt.document_mut().take_mutations(), []);
}

#[test]
fn keyed_nodes_survive_reordering() {
    let (mut rt, body) = runtime();
    let list = |keys: &[&str]| {
        h("ul").children(
            keys.iter()
                .map(|key| h("li").key(*key).child(key.to_uppercase())),
        )
    };

    rt.render(list(&["a", "b", "c"]), body).expect("render");
    let ul = rt.document().children(body)[0];
    let before = rt.document().children(ul).to_vec();

    rt.render(list(&["a", "c", "d"]), body).expect("render");
    let after = rt.document().children(ul).to_vec();

    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], before[2]);
    assert!(!before.contains(&after[2]));
    assert!(!rt.document().exists(before[1]));
    assert_eq!(rt.document().inner_html(ul), "<li>A</li><li>C</li><li>D</li>");
}

#[test]
fn memo_gates_children() {
    let (mut rt, body) = runtime();
    let view = |token: i32, label: &str| h("p").memo(token).child(label.to_owned());

    rt.render(view(1, "first"), body).expect("render");
    rt.render(view(1, "second"), body).expect("render");
    assert_eq!(rt.document().inner_html(body), "<p>first</p>");

    rt.render(view(2, "third"), body).expect("render");
    assert_eq!(rt.document().inner_html(body), "<p>third</p>");
}

#[test]
fn components_keep_their_instance_at_the_same_position() {
    let labelled = Stateful::builder("labelled", |_| {
        let renders = Rc::new(Cell::new(0));
        render_loop(move |scope| {
            renders.set(renders.get() + 1);
            let label = scope.args().str("label").unwrap_or_default();
            Ok(format!("{label} #{}", renders.get()).into())
        })
    })
    .build()
    .expect("valid component");
    let (mut rt, body) = runtime();

    rt.render(h(&labelled).key("x").attr("label", "one"), body)
        .expect("render");
    let host = rt.document().children(body)[0];
    rt.render(h(&labelled).key("x").attr("label", "two"), body)
        .expect("render");
    assert_eq!(rt.document().children(body)[0], host);
    assert_eq!(rt.document().inner_html(body), "<div>two #2</div>");

    rt.render(h(&labelled).key("y").attr("label", "three"), body)
        .expect("render");
    assert_ne!(rt.document().children(body)[0], host);
    assert_eq!(rt.document().inner_html(body), "<div>three #1</div>");
}

#[test]
fn errors_bubble_to_the_nearest_handler() {
    let failing = Stateful::builder("failing", |_| {
        render_loop(|_| Err(Error::msg("render failed")))
    })
    .build()
    .expect("valid component");
    let passthrough = {
        let failing = failing.clone();
        Stateful::builder("passthrough", move |_| {
            let failing = failing.clone();
            render_loop(move |_| Ok(h("span").child(h(&failing)).into()))
        })
        .build()
        .expect("valid component")
    };
    let boundary = {
        let passthrough = passthrough.clone();
        Stateful::builder("boundary", move |_| {
            let passthrough = passthrough.clone();
            render_loop(move |_| Ok(h(&passthrough).into()))
                .recover(|_, error| Ok(format!("recovered: {}", error.root_cause()).into()))
        })
        .is("main")
        .build()
        .expect("valid component")
    };

    let (mut rt, body) = runtime();
    rt.render(h(&boundary), body).expect("handled below the root");
    assert_eq!(
        rt.document().inner_html(body),
        "<main>recovered: render failed</main>"
    );

    let (mut rt, body) = runtime();
    let error = rt
        .render(h("div").child(h(&passthrough)), body)
        .expect_err("nothing handles the error");
    assert_eq!(error.root_cause().to_string(), "render failed");
}

#[test]
fn removal_runs_teardown_once() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let widget = {
        let log = Rc::clone(&log);
        Stateful::builder("widget", move |scope| {
            let log = Rc::clone(&log);
            scope.cleanup({
                let log = Rc::clone(&log);
                move || {
                    log.borrow_mut().push("cleanup".to_owned());
                    Ok(())
                }
            });
            render_loop(|_| Ok("widget".into())).finally(move |_| {
                log.borrow_mut().push("finally".to_owned());
                Ok(())
            })
        })
        .build()
        .expect("valid component")
    };
    let refs = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&refs);
    let tree = move |show: bool| {
        let seen = Rc::clone(&seen);
        h("div").child(show.then(|| {
            h(&widget).node_ref(move |node| seen.borrow_mut().push(node.is_some()))
        }))
    };

    let (mut rt, body) = runtime();
    rt.render(tree(true), body).expect("render");
    rt.render(tree(false), body).expect("render");
    rt.render(tree(false), body).expect("render");

    assert_eq!(*log.borrow(), ["cleanup", "finally"]);
    assert_eq!(*refs.borrow(), [true, false]);
    assert_eq!(rt.document().inner_html(body), "<div></div>");
}

#[test]
fn text_and_void_elements_keep_their_identity() {
    let (mut rt, body) = runtime();
    let view = |class: &str| {
        h("div")
            .attr("class", class.to_owned())
            .child("Hello")
            .child(h("br"))
            .child(" World")
    };

    rt.render(view("c"), body).expect("render");
    assert_eq!(
        rt.document().inner_html(body),
        r#"<div class="c">Hello<br> World</div>"#
    );
    let div = rt.document().children(body)[0];
    let children = rt.document().children(div).to_vec();
    rt.document_mut().take_mutations();

    rt.render(view("d"), body).expect("render");
    assert_eq!(
        rt.document_mut().take_mutations(),
        [Mutation::SetAttribute(div, "class".to_owned())]
    );
    assert_eq!(rt.document().children(div), children);
    assert_eq!(
        rt.document().inner_html(body),
        r#"<div class="d">Hello<br> World</div>"#
    );
}

#[test]
fn counter_rerenders_its_own_subtree() {
    let counter = Stateful::builder("counter", |_| {
        let count = Rc::new(Cell::new(0));
        render_loop(move |scope| {
            let handle = scope.handle();
            let count = Rc::clone(&count);
            let label = format!("Count: {}", count.get());
            let increment = on(move |rt: &mut Runtime, _: &Event| {
                count.set(count.get() + 1);
                match handle.node() {
                    Some(node) => rt.refresh(node),
                    None => Ok(()),
                }
            });
            Ok(h("button").set("onclick", increment).child(label).into())
        })
    })
    .is("x-counter")
    .build()
    .expect("valid component");

    let (mut rt, body) = runtime();
    rt.render(
        h("main").child(h("h1").child("Demo")).child(h(&counter)),
        body,
    )
    .expect("render");
    let main = rt.document().children(body)[0];
    let heading = rt.document().children(main)[0];
    let host = rt.document().children(main)[1];
    let button = rt.document().children(host)[0];
    assert_eq!(rt.document().text_content(button), "Count: 0");
    rt.document_mut().take_mutations();

    let invoked = rt
        .dispatch(button, Event::new("click"))
        .expect("listener runs");
    assert_eq!(invoked, 1);

    assert_eq!(rt.document().text_content(button), "Count: 1");
    assert_eq!(rt.document().children(main), [heading, host]);
    assert_eq!(rt.document().children(host), [button]);
    let moved: Vec<NodeId> = rt
        .document_mut()
        .take_mutations()
        .into_iter()
        .filter_map(|mutation| match mutation {
            Mutation::Insert { node, .. } | Mutation::Remove { node, .. } => Some(node),
            _ => None,
        })
        .collect();
    assert!(!moved.contains(&host) && !moved.contains(&heading));
}

#[test]
fn scheduled_renders_wait_for_a_flush() {
    let ticker = Stateful::builder("ticker", |scope| {
        let handle = scope.handle();
        let ticks = Rc::new(Cell::new(0));
        render_loop(move |_| {
            ticks.set(ticks.get() + 1);
            if ticks.get() < 3 {
                handle.request_animation_frame();
            }
            Ok(ticks.get().to_string().into())
        })
    })
    .build()
    .expect("valid component");

    let (mut rt, body) = runtime();
    rt.render(h(&ticker), body).expect("render");
    assert_eq!(rt.document().inner_html(body), "<div>1</div>");

    rt.run_until_idle().expect("flush");
    assert_eq!(rt.document().inner_html(body), "<div>3</div>");
}

#[test]
fn context_follows_the_instance_tree() {
    let theme = context("light");
    let reader = {
        let theme = theme.clone();
        Stateful::builder("reader", move |_| {
            let theme = theme.clone();
            render_loop(move |scope| Ok(scope.get(&theme).into()))
        })
        .is("span")
        .build()
        .expect("valid component")
    };
    let provider = {
        let (theme, reader) = (theme.clone(), reader.clone());
        Stateful::builder("provider", move |scope| {
            scope.set(&theme, "dark");
            let reader = reader.clone();
            render_loop(move |_| Ok(h(&reader).into()))
        })
        .build()
        .expect("valid component")
    };

    let (mut rt, body) = runtime();
    rt.render(h("main").child(h(&provider)).child(h(&reader)), body)
        .expect("render");
    assert_eq!(
        rt.document().inner_html(body),
        "<main><div><span>dark</span></div><span>light</span></main>"
    );
}

#[test]
fn teardown_errors_reach_the_enclosing_handler() {
    let fragile = Stateful::builder("fragile", |_| {
        render_loop(|_| Ok("fragile".into()))
            .finally(|_| Err(Error::msg("teardown failed")))
    })
    .build()
    .expect("valid component");
    let shell = Stateful::builder("shell", move |_| {
        let fragile = fragile.clone();
        render_loop(move |scope| {
            let child = scope.args().flag("show").then(|| h(&fragile));
            Ok(h("span").child(child).into())
        })
        .recover(|_, error| Ok(format!("recovered: {error}").into()))
    })
    .build()
    .expect("valid component");

    let (mut rt, body) = runtime();
    rt.render(h(&shell).attr("show", true), body).expect("render");
    assert_eq!(
        rt.document().inner_html(body),
        "<div><span><div>fragile</div></span></div>"
    );

    rt.render(h(&shell).attr("show", false), body)
        .expect("handled by the shell");
    assert_eq!(
        rt.document().inner_html(body),
        "<div>recovered: teardown failed</div>"
    );
}

#[test]
fn scheduled_ancestor_supersedes_its_descendant() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let child = {
        let log = Rc::clone(&log);
        Stateful::builder("child", move |_| {
            let log = Rc::clone(&log);
            render_loop(move |_| {
                log.borrow_mut().push("child");
                Ok("leaf".into())
            })
        })
        .build()
        .expect("valid component")
    };
    let parent = {
        let log = Rc::clone(&log);
        Stateful::builder("parent", move |_| {
            let (log, child) = (Rc::clone(&log), child.clone());
            render_loop(move |_| {
                log.borrow_mut().push("parent");
                Ok(h("section").child(h(&child)).into())
            })
        })
        .build()
        .expect("valid component")
    };

    let (mut rt, body) = runtime();
    rt.render(h(&parent), body).expect("render");
    let parent_host = rt.document().children(body)[0];
    let section = rt.document().children(parent_host)[0];
    let child_host = rt.document().children(section)[0];
    log.borrow_mut().clear();

    rt.schedule(child_host, Tier::Microtask);
    rt.schedule(parent_host, Tier::Microtask);
    assert_eq!(rt.flush(Tier::Microtask).expect("flush"), 1);

    assert_eq!(*log.borrow(), ["parent", "child"]);
    assert_eq!(rt.document().children(section), [child_host]);
    assert!(rt.scheduler().is_idle());
}
