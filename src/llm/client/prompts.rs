//! Fixed instruction templates for the three annotation tasks.
//!
//! Placeholders in `{braces}` are substituted per row; everything else is
//! identical across calls of the same task.

/// Flood relevance: decision criteria sent before the row's evidence.
pub const FLOOD_INSTRUCTIONS: &str = r#"Analyze if this TikTok post is flood-related. Consider ALL sources (title, hashtags, transcription, images) and make a COMPREHENSIVE judgment.

Return TRUE if floods/flooding is the PRIMARY content:
- Visual: flooded areas, water damage, rescue operations
- Text: discussions of floods, impacts, events
- News/reporting about flooding
- Political/social commentary where flooding is MAIN topic

Return FALSE if:
- Only passing mention (not main topic)
- Unrelated content using water words
- Visual contradicts text claims

Analysis: (1) Examine each source, (2) Check consistency, (3) Determine if flooding is PRIMARY subject

Strong indicators (TRUE): Multiple sources mention floods consistently, flood hashtags (#flood, #bangladeshfloods), detailed flood discussion, visual flood evidence.

Weak indicators (consider context): Brief mention, generic water imagery, metaphorical flood terms.
"#;

/// Flood relevance: output contract appended after the evidence.
pub const FLOOD_RESPONSE_FORMAT: &str = r#"Respond ONLY with JSON:
{"is_flood_related": true/false, "confidence": "high/medium/low", "reason": "brief explanation"}"#;

/// Humanitarian impact: system message.
pub const IMPACT_SYSTEM_PROMPT: &str = r#"You are a conservative, evidence-driven humanitarian VLM for analyzing flood-related social media posts.

STRICT RULES
- Use TITLE TEXT and IMAGES (key frames).
- A label that requires visual cues may be TRUE only if the images clearly show those cues. Do NOT guess from common sense.
- HARD EVIDENCE POLICY (visual cues required unless noted):
  * infrastructure_access/damage_signs: flooded roads/bridges/houses, blocked vehicles, closed school/clinic signs, etc. Text alone is insufficient.
  * water_food_insecurity: do NOT infer from common sense; only mark loss_types.water_food_insecurity=true if images show distribution/containers/queues OR explicit on-image text that proves shortage. Plain caption is insufficient.
  * education_disruption: school building + closure cues (signs, closed gate, students turned away). Text alone insufficient.
  * displacement: shelters, group sleeping on floors, evacuation boats with belongings. Text alone insufficient.
  * caregiving_burden: visible caregiving actions (carrying child/elderly, wheelchair assistance). Text alone insufficient.
  * psychosocial_distress: do NOT infer from faces; set false unless text explicitly states psychological suffering AND images support the context.
  * urgency_score_0_5 > 0 only when visual danger cues exist (deep water around people/houses, blocked roads, structural damage, active rescue).
- PRIVACY: no identity inference. Demographics are visibility flags only (true only if clearly visible in images).

SCORING
- Precision over recall: false positives are worse than false negatives.
- If uncertain, set present=false (confidence<=0.4).

OUTPUT
- Return STRICT JSON ONLY, exactly matching the schema in the user message. No extra keys, no prose.
- Keep "evidence" concise (≤ 200 characters)."#;

/// Humanitarian impact: user message. `{context}` receives the post block,
/// `{image_count}` the number of attached images.
pub const IMPACT_USER_PROMPT: &str = r#"Task: Visual-first extraction of NON-ECONOMIC flood impact signals for ONE post.

Apply the HARD EVIDENCE policy. Use ONLY TITLE/TEXT and the attached IMAGES (key frames).

Demography flags must come from IMAGES ONLY. If the group is not clearly visible, set the flag to false.

POST CONTEXT

{context}

{image_count}

Return EXACTLY this JSON (and nothing else):
{
  "loss_types": {
    "displacement":              {"present": false, "confidence": 0.0},
    "education_disruption":      {"present": false, "confidence": 0.0},
    "health_trauma":             {"present": false, "confidence": 0.0},
    "social_ties_loss":          {"present": false, "confidence": 0.0},
    "cultural_ritual_disruption":{"present": false, "confidence": 0.0},
    "caregiving_burden":         {"present": false, "confidence": 0.0},
    "water_food_insecurity":     {"present": false, "confidence": 0.0},
    "infrastructure_access":     {"present": false, "confidence": 0.0},
    "psychosocial_distress":     {"present": false, "confidence": 0.0}
  },
  "urgency_score_0_5": 0,
  "visual_cues": {
    "water_depth_bin": "unknown",
    "crowd_size_bin": "unknown",
    "relief_visible": false,
    "relief_actor_type": "none",
    "damage_signs": ["none"]
  },
  "demography_presence": {
    "children": false,
    "elderly": false,
    "pregnant": false,
    "disabled_aid": false,
    "male": false,
    "female": false
  },
  "scene_type": {
    "aerial": false,
    "ground_outdoor": false,
    "indoor": false
  },
  "context_area": ["unknown"],
  "sentiment": [
    {"label":"fear","present":false,"confidence":0.0},
    {"label":"hopelessness","present":false,"confidence":0.0},
    {"label":"grief","present":false,"confidence":0.0},
    {"label":"anger","present":false,"confidence":0.0},
    {"label":"resilience","present":false,"confidence":0.0},
    {"label":"neutral","present":false,"confidence":0.0},
    {"label":"mixed","present":false,"confidence":0.0}
  ],
  "recovery": {
    "recovery_signals": false,
    "evidence": ""
  }
}

FIELD DEFINITIONS:
- water_depth_bin: one of {"none","ankle","knee","waist","vehicle_height","indoor_flood","unknown"}
- crowd_size_bin: one of {"1","2-5","6-20",">20","unknown"}
- relief_actor_type: one of {"ngo","government","community","unknown","none"}
- damage_signs: choose any of {"road_blocked","house_inundated","bridge_damage","school_closed_sign","clinic_closed_sign","power_outage_sign","other","none"}
- context_area: choose any subset of {"settlement","farmland","roadway","riverbank","school_or_health_facility","mixed","unknown"}
- confidence values: 0.0 to 1.0
- urgency_score_0_5: integer from 0 to 5"#;

/// Damage extraction: system message.
pub const DAMAGE_SYSTEM_PROMPT: &str = r#"You are a precise visual analysis model for flood damage assessment.

TASK: Analyze flood-related images and extract:
1. Damage categories: Identify which types of damage are CLEARLY VISIBLE in the images
2. Image description: Provide a brief, factual description of what the images show

STRICT RULES:
- Only mark a damage category as true if it is CLEARLY VISIBLE in the images
- Do NOT infer damage from text alone - visual evidence required
- Be conservative: when uncertain, mark as false
- Keep description concise (2-3 sentences max)
- Focus on observable facts, not assumptions

OUTPUT: Return STRICT JSON ONLY, matching the schema exactly. No extra text."#;

/// Damage extraction: user message. `{image_count}` receives the attachment line.
pub const DAMAGE_USER_PROMPT: &str = r#"Analyze the attached flood-related image(s). {image_count}

Extract VISIBLE damage categories and provide a brief description.

Return EXACTLY this JSON (and nothing else):
{
  "damage_categories": {
    "car": false,
    "house": false,
    "crops": false,
    "road": false,
    "bridge": false
  },
  "image_description": ""
}

FIELD DEFINITIONS:
- car: true if damaged/submerged vehicles (cars, motorcycles, trucks) are CLEARLY VISIBLE
- house: true if damaged/flooded buildings or residential structures are CLEARLY VISIBLE
- crops: true if damaged/flooded agricultural fields or crops are CLEARLY VISIBLE
- road: true if damaged/flooded roads or streets are CLEARLY VISIBLE
- bridge: true if damaged/flooded bridges are CLEARLY VISIBLE
- image_description: 2-3 sentence factual description of what the images show (scene, people, activities, damage level)

Only mark as true what you can CLEARLY SEE in the images."#;

/// Short request used to load the model before the first real call.
pub const WARM_UP_PROMPT: &str = "Warm up and respond with OK.";
