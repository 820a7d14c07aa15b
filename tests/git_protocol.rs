//! Full protocol flows against the in-memory backend: advertisement,
//! clone/fetch negotiation, pushes with their compare-and-swap and
//! fast-forward rules, and branch lifecycle.

mod common;

use brig::areas::bridge::{BridgeOptions, flatten_tree};
use brig::artifacts::negotiation::{ObjectSet, ObjectSource};
use brig::artifacts::objects::object::GitObject;
use brig::artifacts::objects::object_id::ObjectId;
use brig::artifacts::objects::object_type::ObjectType;
use brig::artifacts::pack::reader::read_pack;
use brig::protocol::advertisement::GitService;
use bytes::Bytes;
use common::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn no_bases(_: &ObjectId) -> Option<(ObjectType, Bytes)> {
    None
}

fn decode_response_pack(response: &[u8]) -> ObjectSet {
    let pack = extract_pack(response);
    ObjectSet::from_objects(read_pack(&pack, &no_bases).unwrap()).unwrap()
}

#[tokio::test]
async fn empty_repository_advertises_no_refs() {
    let fx = fixture().await;

    let advertisement = fx
        .bridge
        .handle_info_refs(REPO, GitService::UploadPack)
        .await
        .unwrap();

    assert!(parse_advertised_refs(&advertisement).is_empty());
    let text = String::from_utf8_lossy(&advertisement).to_string();
    assert!(text.contains("capabilities^{}"));
}

#[tokio::test]
async fn backend_commit_is_advertised_and_clonable() {
    let fx = fixture().await;
    seed_backend_commit(
        &fx.backend,
        "main",
        &[
            ("README.md", b"# demo\n".as_slice()),
            ("config.json", b"{}"),
            ("data/train.csv", b"a,b\n1,2\n"),
        ],
        "initial import",
    )
    .await;

    let advertisement = fx
        .bridge
        .handle_info_refs(REPO, GitService::UploadPack)
        .await
        .unwrap();
    let refs = parse_advertised_refs(&advertisement);
    let head = refs.get("HEAD").unwrap();
    assert_eq!(refs.get("refs/heads/main"), Some(head));
    assert_eq!(
        fx.bridge.handle_head(REPO).await.unwrap(),
        "ref: refs/heads/main\n"
    );

    // Clone: want the advertised head with no haves
    let response = fx
        .bridge
        .handle_upload_pack(REPO, &upload_pack_body(&[head], &[]))
        .await
        .unwrap();
    let objects = decode_response_pack(&response);

    let commit = objects.get(head).and_then(GitObject::as_commit).unwrap();
    assert_eq!(commit.parents(), &[]);
    assert_eq!(commit.message(), "initial import");

    let flat = flatten_tree(commit.tree_oid(), &objects).unwrap();
    assert_eq!(
        flat.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["README.md", "config.json", "data/train.csv"]
    );
    let readme = objects
        .get(&flat["README.md"].oid)
        .and_then(GitObject::as_blob)
        .unwrap();
    assert_eq!(readme.content().as_ref(), b"# demo\n");
}

#[tokio::test]
async fn pushed_commit_reconstructs_byte_exactly() {
    let fx = fixture().await;
    let (tip, objects) = build_commit(
        &[("model.json", b"{\"layers\": 12}".as_slice()), ("src/train.py", b"print()\n")],
        vec![],
        "add model\n",
    );

    let body = receive_pack_body(&[(&zero_oid(), &tip, "refs/heads/main")], &pack_of(&objects));
    let report = fx.bridge.handle_receive_pack(REPO, &body).await.unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ok refs/heads/main"]
    );

    // The advertised ref is the pushed commit id: flatten and reconstruct
    // cancelled out exactly
    let advertisement = fx
        .bridge
        .handle_info_refs(REPO, GitService::UploadPack)
        .await
        .unwrap();
    let refs = parse_advertised_refs(&advertisement);
    assert_eq!(refs.get("refs/heads/main"), Some(&tip));

    // And the flat side holds the raw bytes
    let stored = fx
        .backend
        .get_entry(REPO, "main", "model.json")
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), b"{\"layers\": 12}");

    // A fresh clone returns the identical object set
    let response = fx
        .bridge
        .handle_upload_pack(REPO, &upload_pack_body(&[&tip], &[]))
        .await
        .unwrap();
    let fetched = decode_response_pack(&response);
    assert_eq!(fetched.len(), objects.len());
    for (oid, _) in objects.iter() {
        assert!(fetched.contains(oid), "object {oid} missing from clone");
    }
}

#[tokio::test]
async fn second_push_stages_only_the_diff() {
    let fx = fixture().await;
    let (first, objects_first) = build_commit(
        &[("kept.txt", b"same".as_slice()), ("changed.txt", b"v1")],
        vec![],
        "first\n",
    );
    let body = receive_pack_body(
        &[(&zero_oid(), &first, "refs/heads/main")],
        &pack_of(&objects_first),
    );
    fx.bridge.handle_receive_pack(REPO, &body).await.unwrap();

    let before = fx.backend.staged_paths().await.len();
    let (second, objects_second) = build_commit(
        &[
            ("kept.txt", b"same".as_slice()),
            ("changed.txt", b"v2"),
            ("new.txt", b"fresh"),
        ],
        vec![first.clone()],
        "second\n",
    );
    let body = receive_pack_body(
        &[(&first, &second, "refs/heads/main")],
        &pack_of(&objects_second),
    );
    let report = fx.bridge.handle_receive_pack(REPO, &body).await.unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ok refs/heads/main"]
    );

    let mut staged = fx.backend.staged_paths().await.split_off(before);
    staged.sort();
    assert_eq!(staged, vec!["changed.txt", "new.txt"]);
}

#[tokio::test]
async fn fetch_with_haves_omits_shared_history() {
    let fx = fixture().await;
    let (first, objects_first) = build_commit(
        &[("shared.bin", b"unchanged".as_slice()), ("old.txt", b"v1")],
        vec![],
        "first\n",
    );
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &first, "refs/heads/main")],
                &pack_of(&objects_first),
            ),
        )
        .await
        .unwrap();

    let (second, objects_second) = build_commit(
        &[("shared.bin", b"unchanged".as_slice()), ("old.txt", b"v2")],
        vec![first.clone()],
        "second\n",
    );
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&first, &second, "refs/heads/main")],
                &pack_of(&objects_second),
            ),
        )
        .await
        .unwrap();

    let response = fx
        .bridge
        .handle_upload_pack(REPO, &upload_pack_body(&[&second], &[&first]))
        .await
        .unwrap();
    let fetched = decode_response_pack(&response);

    // No object reachable from the have: not the old commit, not the
    // unchanged blob
    assert!(!fetched.contains(&first));
    let shared_blob = &objects_first
        .iter()
        .find(|(_, object)| {
            object
                .as_blob()
                .is_some_and(|blob| blob.content().as_ref() == b"unchanged")
        })
        .unwrap()
        .0
        .clone();
    assert!(!fetched.contains(shared_blob));
    // Everything new is present: tip commit, its tree, the changed blob
    assert!(fetched.contains(&second));
    assert_eq!(fetched.len(), 3);
}

#[tokio::test]
async fn concurrent_pushes_race_at_the_ref_and_the_loser_conflicts() {
    let fx = fixture().await;
    let (base, base_objects) = build_commit(&[("f.txt", b"base".as_slice())], vec![], "base\n");
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &base, "refs/heads/main")],
                &pack_of(&base_objects),
            ),
        )
        .await
        .unwrap();

    // Two clients build on the same base
    let (winner, winner_objects) =
        build_commit(&[("f.txt", b"winner".as_slice())], vec![base.clone()], "w\n");
    let (loser, loser_objects) =
        build_commit(&[("f.txt", b"loser".as_slice())], vec![base.clone()], "l\n");

    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&base, &winner, "refs/heads/main")],
                &pack_of(&winner_objects),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ok refs/heads/main"]
    );

    // Same old id, but the ref has moved: compare-and-swap fails
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&base, &loser, "refs/heads/main")],
                &pack_of(&loser_objects),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ng refs/heads/main fetch first"]
    );

    // The ref holds the winner
    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert_eq!(refs.get("refs/heads/main"), Some(&winner));
}

#[rstest]
#[case::rejected_by_default(false)]
#[case::allowed_when_forced(true)]
#[tokio::test]
async fn non_fast_forward_push(#[case] forced: bool) {
    let fx = fixture_with(BridgeOptions {
        public_url: PUBLIC_URL.to_string(),
        allow_force_push: forced,
        ..BridgeOptions::default()
    })
    .await;

    let (first, objects_first) = build_commit(&[("a.txt", b"1".as_slice())], vec![], "one\n");
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &first, "refs/heads/main")],
                &pack_of(&objects_first),
            ),
        )
        .await
        .unwrap();
    let (second, objects_second) =
        build_commit(&[("a.txt", b"2".as_slice())], vec![first.clone()], "two\n");
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&first, &second, "refs/heads/main")],
                &pack_of(&objects_second),
            ),
        )
        .await
        .unwrap();

    // Rewritten history: a different child of the first commit, pushed
    // with the honest old id
    let (rewritten, objects_rewritten) =
        build_commit(&[("a.txt", b"2'".as_slice())], vec![first.clone()], "two redone\n");
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&second, &rewritten, "refs/heads/main")],
                &pack_of(&objects_rewritten),
            ),
        )
        .await
        .unwrap();

    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    if forced {
        assert_eq!(
            parse_report(&report),
            vec!["unpack ok", "ok refs/heads/main"]
        );
        assert_eq!(refs.get("refs/heads/main"), Some(&rewritten));
    } else {
        assert_eq!(
            parse_report(&report),
            vec!["unpack ok", "ng refs/heads/main fetch first"]
        );
        assert_eq!(refs.get("refs/heads/main"), Some(&second));
    }
}

#[tokio::test]
async fn branch_create_and_delete() {
    let fx = fixture().await;
    let (main_tip, main_objects) = build_commit(&[("a.txt", b"a".as_slice())], vec![], "main\n");
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &main_tip, "refs/heads/main")],
                &pack_of(&main_objects),
            ),
        )
        .await
        .unwrap();

    // New branch forking from main's head: the pack only needs the new commit
    let (dev_tip, dev_objects) = build_commit(
        &[("a.txt", b"a".as_slice()), ("dev.txt", b"wip")],
        vec![main_tip.clone()],
        "dev work\n",
    );
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &dev_tip, "refs/heads/dev")],
                &pack_of(&dev_objects),
            ),
        )
        .await
        .unwrap();
    assert_eq!(parse_report(&report), vec!["unpack ok", "ok refs/heads/dev"]);

    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert_eq!(refs.get("refs/heads/dev"), Some(&dev_tip));
    assert_eq!(refs.get("refs/heads/main"), Some(&main_tip));

    // Deleting dev is a zero-new push with no pack
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(&[(&dev_tip, &zero_oid(), "refs/heads/dev")], &[]),
        )
        .await
        .unwrap();
    assert_eq!(parse_report(&report), vec!["unpack ok", "ok refs/heads/dev"]);

    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert!(!refs.contains_key("refs/heads/dev"));

    // The default branch refuses deletion
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(&[(&main_tip, &zero_oid(), "refs/heads/main")], &[]),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ng refs/heads/main not translatable"]
    );
}

#[tokio::test]
async fn merge_push_accepted_with_current_head_as_first_parent() {
    let fx = fixture().await;
    let (base, base_objects) = build_commit(&[("a.txt", b"a".as_slice())], vec![], "base\n");
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &base, "refs/heads/main")],
                &pack_of(&base_objects),
            ),
        )
        .await
        .unwrap();
    let (side, side_objects) = build_commit(
        &[("a.txt", b"a".as_slice()), ("side.txt", b"s")],
        vec![base.clone()],
        "side\n",
    );
    fx.bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &side, "refs/heads/dev")],
                &pack_of(&side_objects),
            ),
        )
        .await
        .unwrap();

    // Merge with main's head first: accepted, the merged tree wins
    let (merge, merge_objects) = build_commit(
        &[("a.txt", b"a".as_slice()), ("side.txt", b"s")],
        vec![base.clone(), side.clone()],
        "merge dev\n",
    );
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&base, &merge, "refs/heads/main")],
                &pack_of(&merge_objects),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ok refs/heads/main"]
    );

    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert_eq!(refs.get("refs/heads/main"), Some(&merge));

    // A merge whose first parent is the side branch is not a fast-forward
    // of main even though main's head is reachable: rejected
    let (swapped, swapped_objects) = build_commit(
        &[("a.txt", b"a".as_slice()), ("side.txt", b"s2")],
        vec![side.clone(), merge.clone()],
        "swapped merge\n",
    );
    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&merge, &swapped, "refs/heads/main")],
                &pack_of(&swapped_objects),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ng refs/heads/main not translatable"]
    );
}

#[tokio::test]
async fn unknown_want_is_reported_before_any_pack_bytes() {
    let fx = fixture().await;
    seed_backend_commit(&fx.backend, "main", &[("a.txt", b"a")], "seed").await;

    let bogus = ObjectId::try_parse("f".repeat(40)).unwrap();
    let response = fx
        .bridge
        .handle_upload_pack(REPO, &upload_pack_body(&[&bogus], &[]))
        .await
        .unwrap();

    let text = String::from_utf8_lossy(&response).to_string();
    assert!(text.contains("ERR"));
    assert!(text.contains("unknown object"));
    assert!(!text.contains("PACK"));
}

#[tokio::test]
async fn push_with_missing_objects_is_rejected() {
    let fx = fixture().await;
    let (tip, objects) = build_commit(&[("a.txt", b"payload".as_slice())], vec![], "tip\n");

    // Strip the blob out of the pack: the commit graph has a hole
    let mut incomplete = ObjectSet::new();
    for (_, object) in objects.iter() {
        if object.as_blob().is_none() {
            incomplete.insert(object.clone()).unwrap();
        }
    }

    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(
                &[(&zero_oid(), &tip, "refs/heads/main")],
                &pack_of(&incomplete),
            ),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_report(&report),
        vec!["unpack ok", "ng refs/heads/main missing object"]
    );

    // Nothing was applied
    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert!(refs.is_empty());
}

#[tokio::test]
async fn corrupt_pack_aborts_the_whole_push() {
    let fx = fixture().await;
    let (tip, objects) = build_commit(&[("a.txt", b"content".as_slice())], vec![], "tip\n");

    let mut pack = pack_of(&objects).to_vec();
    let last = pack.len() - 1;
    pack[last] ^= 0xff;

    let report = fx
        .bridge
        .handle_receive_pack(
            REPO,
            &receive_pack_body(&[(&zero_oid(), &tip, "refs/heads/main")], &pack),
        )
        .await
        .unwrap();

    let lines = parse_report(&report);
    assert_eq!(lines[0], "unpack pack corrupt");
    assert_eq!(lines[1], "ng refs/heads/main unpacking failed");

    let refs = parse_advertised_refs(
        &fx.bridge
            .handle_info_refs(REPO, GitService::UploadPack)
            .await
            .unwrap(),
    );
    assert!(refs.is_empty());
}
