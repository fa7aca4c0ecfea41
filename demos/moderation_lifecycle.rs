use modwarden::moderation::{ConfigStore, InfractionRecord, InfractionStore, Verdict, decide};

#[tokio::main]
async fn main() {
    println!("Moderation Lifecycle Test");
    println!("-------------------------");

    // Keep everything under a temp dir so the demo leaves no files behind
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("guild_config.json");
    let infractions_path = dir.path().join("user_infractions.json");

    let configs = ConfigStore::new(&config_path);
    let infractions = InfractionStore::new(&infractions_path);

    // A test user and community
    let user_id = 12345;
    let community_id = 67890;

    // 1. Configure the community
    println!("\n--- Configuring the Community ---");
    configs.set_enabled(community_id, true).await.unwrap();
    configs.set_moderator_role(community_id, Some(111)).await.unwrap();
    configs.add_nsfw_channel(community_id, 222).await.unwrap();

    let config = configs.get(community_id);
    println!("Enabled: {}", config.enabled);
    println!("Moderator role: {:?}", config.moderator_role_id);
    println!("Age-restricted channels: {:?}", config.nsfw_channel_ids);
    println!("Classifier model: {}", config.classifier_model);

    // 2. Resolve some classifier verdicts
    println!("\n--- Resolving Verdicts ---");
    let verdicts = [
        Verdict {
            violation: true,
            category: "2".to_string(),
            reasoning: "Targeted insult toward another member".to_string(),
            suggested_action: "WARN".to_string(),
        },
        // The forced-ban category overrides the weak suggestion
        Verdict {
            violation: true,
            category: "5A".to_string(),
            reasoning: "Linked to prohibited material".to_string(),
            suggested_action: "WARN".to_string(),
        },
        // An unrecognized suggestion resolves to no action but flags review
        Verdict {
            violation: true,
            category: "3".to_string(),
            reasoning: "Disruptive flooding".to_string(),
            suggested_action: "ESCALATE_TO_COUNCIL".to_string(),
        },
    ];

    for verdict in &verdicts {
        let history = infractions.history(community_id, user_id);
        let decision = decide(verdict, &history);
        println!(
            "Rule {} + {} -> {} (review: {})",
            verdict.category, verdict.suggested_action, decision.action, decision.review_flag
        );

        if decision.action.records_infraction() {
            let record =
                InfractionRecord::new(decision.category.clone(), decision.action, &decision.reasoning);
            infractions.append(community_id, user_id, record).await.unwrap();
        }
    }

    // 3. Examine the recorded history
    println!("\n--- Infraction History ---");
    for record in infractions.history(community_id, user_id) {
        println!(
            "Rule {} -> {} at {}",
            record.category, record.action_taken, record.timestamp
        );
    }
    println!("\nSummary shown to the classifier:");
    println!("{}", infractions.summarize(community_id, user_id, 5));

    // 4. Reload both stores to show the state survived
    println!("\n--- Reloading From Disk ---");
    let reloaded_configs = ConfigStore::load(&config_path).await;
    let reloaded_infractions = InfractionStore::load(&infractions_path).await;
    println!(
        "Configured communities after reload: {}",
        reloaded_configs.len()
    );
    println!(
        "Records for the test user after reload: {}",
        reloaded_infractions.history(community_id, user_id).len()
    );

    // 5. Clear the user's record
    println!("\n--- Clearing the History ---");
    let removed = infractions.clear(community_id, user_id).await.unwrap();
    println!("Removed {removed} record(s)");
    println!(
        "Records remaining: {}",
        infractions.history(community_id, user_id).len()
    );

    println!("\nModeration lifecycle test completed successfully!");
}
