use crate::fixtures::Harness;
use buildmaster::pool::build_cookie;
use buildmaster_common::BuildStatus;
use std::collections::HashSet;

/// No build is referenced by more than one queue item.
pub fn assert_queue_is_unique(h: &mut Harness) {
    let queue = h.queue();
    let build_ids = queue.iter().map(|item| item.build_id).collect::<HashSet<_>>();
    assert_eq!(build_ids.len(), queue.len(), "duplicate queue items: {:?}", queue);
}

/// Every assigned queue item sits on a builder of its own processor family.
pub fn assert_dispatch_within_family(h: &mut Harness) {
    for item in h.queue() {
        let Some(builder_id) = item.builder_id else {
            continue;
        };
        let build = h.build(item.build_id);
        let builder = buildmaster::models::Builder::get_id(builder_id, &mut h.connection).unwrap();
        assert_eq!(builder.processor, build.processor);
    }
}

/// The build is still dispatched to `processor`'s builder, as it was before.
pub fn assert_still_pinned(h: &mut Harness, build_id: i32, processor: &str, status: BuildStatus) {
    let build = h.build(build_id);
    assert_eq!(build.status, status);

    let builder = h.builder(processor);
    let item = h.queue_item(build_id).expect("queue item was deleted");
    assert_eq!(item.builder_id, Some(builder.id));
    assert!(item.build_started.is_some());
    assert_eq!(
        h.slave(processor).cookie(),
        Some(build_cookie(&build, &item))
    );
}

/// The build waits for a builder again, nobody holds it.
pub fn assert_back_in_pool(h: &mut Harness, build_id: i32) {
    let build = h.build(build_id);
    assert_eq!(build.status, BuildStatus::NeedsBuild);
    assert_eq!(build.builder_id, None);
    assert_eq!(build.build_started, None);

    let item = h.queue_item(build_id).expect("queue item was deleted");
    assert_eq!(item.builder_id, None);
    assert_eq!(item.build_started, None);
}
